use canopy_core::error::{CanopyError, Result};
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use std::time::Duration;
use tokio::time::timeout;

fn store_err(msg: String) -> CanopyError {
    CanopyError::Store(msg)
}

/// Pool transaction whose commit and rollback are bounded by a timeout
pub struct TimedTransaction {
    inner: Option<SqlxTransaction<'static, Postgres>>,
    timeout_duration: Duration,
}

impl TimedTransaction {
    /// Begin a transaction on `pool`
    pub async fn begin(pool: &PgPool, timeout_duration: Duration) -> Result<Self> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| store_err(format!("Failed to begin transaction: {}", e)))?;
        Ok(Self { inner: Some(tx), timeout_duration })
    }

    /// The open sqlx transaction, for executing statements inside it
    pub fn inner_mut(&mut self) -> Result<&mut SqlxTransaction<'static, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| store_err("Transaction already completed".to_string()))
    }

    pub async fn commit(mut self) -> Result<()> {
        let tx = self
            .inner
            .take()
            .ok_or_else(|| store_err("Transaction already completed".to_string()))?;

        match timeout(self.timeout_duration, tx.commit()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(store_err(format!("Failed to commit transaction: {}", e))),
            Err(_) => Err(store_err(format!(
                "Transaction commit timeout after {}s",
                self.timeout_duration.as_secs()
            ))),
        }
    }

    pub async fn rollback(mut self) -> Result<()> {
        let tx = self
            .inner
            .take()
            .ok_or_else(|| store_err("Transaction already completed".to_string()))?;

        match timeout(self.timeout_duration, tx.rollback()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(store_err(format!("Failed to rollback transaction: {}", e))),
            Err(_) => Err(store_err(format!(
                "Transaction rollback timeout after {}s",
                self.timeout_duration.as_secs()
            ))),
        }
    }
}
