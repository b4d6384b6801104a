//! Capture and upload of a whole controller configuration
//!
//! Tables are transferred one slot at a time, strictly in order, each slot a
//! single request/response. A failure stops the transfer where it happened;
//! nothing already written is rolled back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::model::{
    ConfigurationSnapshot, FlowRule, Holiday, Intermittence, ModelError, Movement, Plan,
    Sequence, SlotRecord, Table,
};
use crate::protocol::{Client, ProtocolError};

/// Cooperative cancellation flag, checked before every slot
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the transaction in flight still completes
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the token can be reused
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Errors from a capture or upload
#[derive(Error, Debug)]
pub enum SyncError {
    /// A slot transaction failed; earlier slots stay written
    #[error("{table}[{index}]: {source}")]
    Transfer {
        /// Table being transferred
        table: Table,
        /// Slot that failed
        index: u8,
        /// Underlying failure
        #[source]
        source: ProtocolError,
    },

    /// Cancellation observed before a slot
    #[error("cancelled before {table}[{index}]")]
    Cancelled {
        /// Table that was next
        table: Table,
        /// First slot not transferred
        index: u8,
    },

    /// Snapshot rejected before anything was sent
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ModelError),
}

impl SyncError {
    /// Table and slot where the transfer stopped, if any
    pub fn position(&self) -> Option<(Table, u8)> {
        match self {
            SyncError::Transfer { table, index, .. } | SyncError::Cancelled { table, index } => {
                Some((*table, *index))
            }
            SyncError::Invalid(_) => None,
        }
    }
}

/// Where a transfer currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Table being transferred
    pub table: Table,
    /// Slot about to be transferred
    pub index: u8,
    /// Slots in the table
    pub total: u8,
}

/// Counts from a completed upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Controller ID was written
    pub identity_written: bool,
    /// Slots written with a record
    pub written: usize,
    /// Slots written with the empty pattern
    pub cleared: usize,
}

type ProgressFn = Box<dyn Fn(Progress) + Send + Sync>;

/// Runs full-configuration transfers over a [`Client`]
pub struct Orchestrator {
    client: Client,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
}

impl Orchestrator {
    /// Orchestrator with its own cancellation token and no progress callback
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Use an existing cancellation token
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report progress before every slot
    pub fn on_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Token that cancels this orchestrator's transfers
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn checkpoint(&self, table: Table, index: u8) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            tracing::info!(%table, index, "transfer cancelled");
            return Err(SyncError::Cancelled { table, index });
        }
        if let Some(progress) = &self.progress {
            progress(Progress {
                table,
                index,
                total: table.capacity(),
            });
        }
        Ok(())
    }

    /// Read every table from the controller
    pub fn capture_all(&self) -> Result<ConfigurationSnapshot, SyncError> {
        let mut snapshot = ConfigurationSnapshot::new();

        self.checkpoint(Table::Identity, 0)?;
        snapshot.info.controller_id = absent_on_nack(self.client.get_id())
            .map_err(|source| transfer(Table::Identity, 0, source))?;

        self.checkpoint(Table::Clock, 0)?;
        snapshot.info.clock = absent_on_nack(self.client.get_clock())
            .map_err(|source| transfer(Table::Clock, 0, source))?;

        self.capture_table::<Movement>(&mut snapshot)?;
        self.capture_table::<Sequence>(&mut snapshot)?;
        self.capture_table::<Plan>(&mut snapshot)?;
        self.capture_table::<Intermittence>(&mut snapshot)?;

        self.checkpoint(Table::Holidays, 0)?;
        snapshot.holidays = self
            .client
            .read_holidays()
            .map_err(|source| transfer(Table::Holidays, 0, source))?;

        self.capture_table::<FlowRule>(&mut snapshot)?;

        tracing::info!(
            controller_id = ?snapshot.info.controller_id,
            records = snapshot.record_count(),
            "capture complete"
        );
        Ok(snapshot)
    }

    fn capture_table<R: SlotRecord>(&self, snapshot: &mut ConfigurationSnapshot) -> Result<(), SyncError> {
        let records = R::records_mut(snapshot);
        records.clear();
        for index in 0..R::TABLE.capacity() {
            self.checkpoint(R::TABLE, index)?;
            let record = self
                .client
                .read_record::<R>(index)
                .map_err(|source| transfer(R::TABLE, index, source))?;
            if let Some(record) = record {
                records.push(record);
            }
        }
        tracing::debug!(table = %R::TABLE, count = records.len(), "table captured");
        Ok(())
    }

    /// Write `snapshot` to the controller, clearing every slot it leaves empty
    pub fn upload_all(&self, snapshot: &ConfigurationSnapshot) -> Result<UploadReport, SyncError> {
        snapshot.validate()?;
        let mut report = UploadReport::default();

        if let Some(id) = snapshot.info.controller_id {
            self.checkpoint(Table::Identity, 0)?;
            self.client
                .set_id(id)
                .map_err(|source| transfer(Table::Identity, 0, source))?;
            report.identity_written = true;
        }

        self.upload_table::<Movement>(snapshot, &mut report)?;
        self.upload_table::<Sequence>(snapshot, &mut report)?;
        self.upload_table::<Plan>(snapshot, &mut report)?;
        self.upload_table::<Intermittence>(snapshot, &mut report)?;
        self.upload_table::<Holiday>(snapshot, &mut report)?;
        self.upload_table::<FlowRule>(snapshot, &mut report)?;

        tracing::info!(written = report.written, cleared = report.cleared, "upload complete");
        Ok(report)
    }

    fn upload_table<R: SlotRecord>(
        &self,
        snapshot: &ConfigurationSnapshot,
        report: &mut UploadReport,
    ) -> Result<(), SyncError> {
        let by_index: HashMap<u8, &R> = R::records(snapshot).iter().map(|r| (r.index(), r)).collect();
        for index in 0..R::TABLE.capacity() {
            self.checkpoint(R::TABLE, index)?;
            let result = match by_index.get(&index) {
                Some(record) => self.client.write_record(*record).map(|_| report.written += 1),
                None => self.client.clear_slot::<R>(index).map(|_| report.cleared += 1),
            };
            result.map_err(|source| transfer(R::TABLE, index, source))?;
        }
        tracing::debug!(table = %R::TABLE, "table uploaded");
        Ok(())
    }
}

fn transfer(table: Table, index: u8, source: ProtocolError) -> SyncError {
    tracing::warn!(%table, index, error = %source, "transfer failed");
    SyncError::Transfer {
        table,
        index,
        source,
    }
}

/// Identity and clock are optional on some firmware; a NACK leaves them unset
fn absent_on_nack<T>(result: Result<T, ProtocolError>) -> Result<Option<T>, ProtocolError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ProtocolError::Nack { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_error_position() {
        let err = SyncError::Cancelled {
            table: Table::Plans,
            index: 3,
        };
        assert_eq!(err.position(), Some((Table::Plans, 3)));
        assert_eq!(err.to_string(), "cancelled before plans[3]");
    }
}
