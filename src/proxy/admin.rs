//! ProxySQL Admin Client
//!
//! Speaks plain SQL to the admin interface on 127.0.0.1:6032. ProxySQL
//! admin does not support prepared statements, so every statement runs
//! over the text protocol.

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use tracing::{debug, info};

use crate::config::ProxyConfig;
use crate::error::{Error, Result};

use super::{Backend, ProxyAdmin};

/// Admin client for a ProxySQL instance
pub struct ProxySqlAdmin {
    host: String,
    port: u16,
    user: String,
    password: String,
    writer_hostgroup: u32,
    reader_hostgroup: u32,
    max_connections: u32,
    monitor_interval_ms: u64,
    monitor_user: String,
    monitor_password: String,
}

impl ProxySqlAdmin {
    /// Create an admin client. The monitor credentials are the
    /// replication user ProxySQL uses to health-check backends.
    pub fn new(config: &ProxyConfig, monitor_user: &str, monitor_password: &str) -> Result<Self> {
        let (host, port) = match config.admin_address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::Config(format!(
                        "invalid proxy admin address: {}",
                        config.admin_address
                    ))
                })?;
                (host.to_string(), port)
            }
            None => (config.admin_address.clone(), 6032),
        };

        Ok(Self {
            host,
            port,
            user: config.admin_user.clone(),
            password: config.admin_password.clone(),
            writer_hostgroup: config.writer_hostgroup,
            reader_hostgroup: config.reader_hostgroup,
            max_connections: config.max_connections,
            monitor_interval_ms: config.monitor_interval_ms,
            monitor_user: monitor_user.to_string(),
            monitor_password: monitor_password.to_string(),
        })
    }

    async fn connect(&self) -> Result<MySqlConnection> {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .connect()
            .await
            .map_err(|e| Error::ProxyUnreachable {
                address: format!("{}:{}", self.host, self.port),
                reason: e.to_string(),
            })
    }

    async fn run(&self, conn: &mut MySqlConnection, sql: &str) -> Result<()> {
        debug!(statement = sql, "proxy admin");
        conn.execute(sql)
            .await
            .map(|_| ())
            .map_err(|e| Error::Proxy(format!("'{}' failed: {}", sql, e)))
    }

    async fn replace_servers(
        &self,
        conn: &mut MySqlConnection,
        writer: Option<&Backend>,
        readers: &[Backend],
    ) -> Result<()> {
        self.run(
            conn,
            &format!(
                "DELETE FROM mysql_servers WHERE hostgroup_id = {}",
                self.writer_hostgroup
            ),
        )
        .await?;
        if let Some(master) = writer {
            self.run(
                conn,
                &format!(
                    "INSERT INTO mysql_servers (hostgroup_id, hostname, port, max_connections) \
                     VALUES ({}, '{}', {}, {})",
                    self.writer_hostgroup,
                    escape(&master.host),
                    master.port,
                    self.max_connections
                ),
            )
            .await?;
        }

        self.run(
            conn,
            &format!(
                "DELETE FROM mysql_servers WHERE hostgroup_id = {}",
                self.reader_hostgroup
            ),
        )
        .await?;
        for reader in readers {
            self.run(
                conn,
                &format!(
                    "INSERT INTO mysql_servers (hostgroup_id, hostname, port, max_connections) \
                     VALUES ({}, '{}', {}, {})",
                    self.reader_hostgroup,
                    escape(&reader.host),
                    reader.port,
                    self.max_connections
                ),
            )
            .await?;
        }

        self.run(conn, "LOAD MYSQL SERVERS TO RUNTIME").await?;
        self.run(conn, "SAVE MYSQL SERVERS TO DISK").await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProxyAdmin for ProxySqlAdmin {
    async fn initialize(&self) -> Result<()> {
        let mut conn = self.connect().await?;

        self.run(
            &mut conn,
            &format!(
                "UPDATE global_variables SET variable_value = '{}' \
                 WHERE variable_name = 'mysql-monitor_username'",
                escape(&self.monitor_user)
            ),
        )
        .await?;
        self.run(
            &mut conn,
            &format!(
                "UPDATE global_variables SET variable_value = '{}' \
                 WHERE variable_name = 'mysql-monitor_password'",
                escape(&self.monitor_password)
            ),
        )
        .await?;
        self.run(
            &mut conn,
            &format!(
                "UPDATE global_variables SET variable_value = '{}' \
                 WHERE variable_name IN ('mysql-monitor_connect_interval', \
                 'mysql-monitor_ping_interval', 'mysql-monitor_read_only_interval')",
                self.monitor_interval_ms
            ),
        )
        .await?;
        self.run(
            &mut conn,
            &format!(
                "UPDATE global_variables SET variable_value = '{}' \
                 WHERE variable_name = 'mysql-max_connections'",
                self.max_connections
            ),
        )
        .await?;
        self.run(&mut conn, "LOAD MYSQL VARIABLES TO RUNTIME").await?;
        self.run(&mut conn, "SAVE MYSQL VARIABLES TO DISK").await?;

        // Route SELECT ... FOR UPDATE to the writer, all other SELECTs
        // to the readers; everything unmatched falls through to the
        // writer hostgroup by default.
        self.run(&mut conn, "DELETE FROM mysql_query_rules").await?;
        self.run(
            &mut conn,
            &format!(
                "INSERT INTO mysql_query_rules (rule_id, active, match_digest, \
                 destination_hostgroup, apply) VALUES (1, 1, '^SELECT .* FOR UPDATE$', {}, 1)",
                self.writer_hostgroup
            ),
        )
        .await?;
        self.run(
            &mut conn,
            &format!(
                "INSERT INTO mysql_query_rules (rule_id, active, match_digest, \
                 destination_hostgroup, apply) VALUES (2, 1, '^SELECT', {}, 1)",
                self.reader_hostgroup
            ),
        )
        .await?;
        self.run(&mut conn, "LOAD MYSQL QUERY RULES TO RUNTIME").await?;
        self.run(&mut conn, "SAVE MYSQL QUERY RULES TO DISK").await?;

        let _ = conn.close().await;
        info!(
            writer_hostgroup = self.writer_hostgroup,
            reader_hostgroup = self.reader_hostgroup,
            "Proxy initialized"
        );
        Ok(())
    }

    async fn publish_routing(&self, master: &Backend, readers: &[Backend]) -> Result<()> {
        let mut conn = self.connect().await?;
        self.replace_servers(&mut conn, Some(master), readers).await?;
        let _ = conn.close().await;
        debug!(
            writer = %master,
            readers = readers.len(),
            "Published routing"
        );
        Ok(())
    }

    async fn publish_empty(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        self.replace_servers(&mut conn, None, &[]).await?;
        let _ = conn.close().await;
        debug!("Published empty routing");
        Ok(())
    }
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}
