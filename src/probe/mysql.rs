//! MySQL Probe
//!
//! Probes database nodes over short-lived connections authenticated
//! with the replication-user credential. Connections are never pooled:
//! each probe opens, queries, and closes within its deadline, so a hung
//! backend cannot poison later ticks.

use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{ConnectOptions, Connection, Row};
use tokio::time::timeout;

use crate::config::ProbeConfig;
use crate::error::Result;

use super::{HealthProbe, NodeProbe, ReplicaStatus};

/// Probe backed by real MySQL connections
pub struct MySqlProbe {
    username: String,
    password: String,
    deadline: Duration,
}

impl MySqlProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            deadline: Duration::from_secs(config.timeout_secs),
        }
    }

    fn options(&self, host: &str, port: u16) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(&self.username)
            .password(&self.password)
    }

    async fn connect(&self, host: &str, port: u16) -> std::result::Result<MySqlConnection, sqlx::Error> {
        self.options(host, port).connect().await
    }

    async fn read_replica_status(
        &self,
        conn: &mut MySqlConnection,
    ) -> std::result::Result<ReplicaStatus, sqlx::Error> {
        // MySQL 8.0.22 renamed the statement and its columns; fall back
        // to the legacy spelling for older servers and MariaDB.
        let row = match sqlx::query("SHOW REPLICA STATUS").fetch_optional(&mut *conn).await {
            Ok(row) => row,
            Err(_) => {
                sqlx::query("SHOW SLAVE STATUS")
                    .fetch_optional(&mut *conn)
                    .await?
            }
        };

        let mut status = match row {
            Some(row) => ReplicaStatus {
                is_replica: true,
                io_running: col_str(&row, &["Replica_IO_Running", "Slave_IO_Running"])
                    .map(|v| v.eq_ignore_ascii_case("yes"))
                    .unwrap_or(false),
                sql_running: col_str(&row, &["Replica_SQL_Running", "Slave_SQL_Running"])
                    .map(|v| v.eq_ignore_ascii_case("yes"))
                    .unwrap_or(false),
                lag_seconds: col_u64(
                    &row,
                    &["Seconds_Behind_Source", "Seconds_Behind_Master"],
                ),
                gtid: col_str(&row, &["Executed_Gtid_Set", "Gtid_IO_Pos"])
                    .unwrap_or_default(),
            },
            None => ReplicaStatus::default(),
        };

        // A node that is not replicating still has a write position
        if status.gtid.is_empty() {
            if let Some(row) = sqlx::query("SHOW MASTER STATUS")
                .fetch_optional(&mut *conn)
                .await?
            {
                status.gtid = col_str(&row, &["Executed_Gtid_Set"]).unwrap_or_default();
            }
        }

        Ok(status)
    }
}

#[async_trait::async_trait]
impl NodeProbe for MySqlProbe {
    async fn probe_health(&self, host: &str, port: u16) -> HealthProbe {
        let attempt = async {
            let mut conn = self.connect(host, port).await?;
            sqlx::query("SELECT 1").execute(&mut conn).await?;
            let _ = conn.close().await;
            Ok::<(), sqlx::Error>(())
        };

        match timeout(self.deadline, attempt).await {
            Ok(Ok(())) => HealthProbe::Online,
            Ok(Err(e)) => HealthProbe::failed(e.to_string()),
            Err(_) => HealthProbe::failed(format!(
                "probe timed out after {:?}",
                self.deadline
            )),
        }
    }

    async fn probe_replication(&self, host: &str, port: u16) -> Result<ReplicaStatus> {
        let attempt = async {
            let mut conn = self.connect(host, port).await?;
            let status = self.read_replica_status(&mut conn).await?;
            let _ = conn.close().await;
            Ok::<ReplicaStatus, sqlx::Error>(status)
        };

        match timeout(self.deadline, attempt).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(crate::Error::ProbeFailed {
                node: format!("{}:{}", host, port),
                reason: format!("replication probe timed out after {:?}", self.deadline),
            }),
        }
    }
}

fn col_str(row: &MySqlRow, names: &[&str]) -> Option<String> {
    for name in names {
        if let Ok(value) = row.try_get::<Option<String>, _>(*name) {
            return value;
        }
    }
    None
}

fn col_u64(row: &MySqlRow, names: &[&str]) -> Option<u64> {
    for name in names {
        if let Ok(value) = row.try_get::<Option<u64>, _>(*name) {
            return value;
        }
        if let Ok(value) = row.try_get::<Option<i64>, _>(*name) {
            return value.and_then(|v| u64::try_from(v).ok());
        }
        if let Ok(value) = row.try_get::<Option<String>, _>(*name) {
            return value.and_then(|v| v.trim().parse().ok());
        }
    }
    None
}
