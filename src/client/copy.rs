//! COPY transfer handle

use super::pg_connection::OwnedConnection;
use crate::result::{PgResult, ResultStatus};
use crate::{Error, Result};
use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::sync::OwnedMutexGuard;

/// An open COPY on a locked session.
///
/// Obtained from [`PgConnection::begin_copy`](crate::PgConnection::begin_copy).
/// The session stays locked for as long as the transfer exists. Dropping an
/// unfinished transfer is allowed: the session cancels (COPY FROM STDIN) or
/// skips (COPY TO STDOUT) the rest of the copy before its next statement.
pub struct CopyTransfer {
    guard: OwnedMutexGuard<OwnedConnection>,
    response: PgResult,
    completion: Option<PgResult>,
}

impl CopyTransfer {
    pub(crate) fn new(guard: OwnedMutexGuard<OwnedConnection>, response: PgResult) -> Self {
        Self {
            guard,
            response,
            completion: None,
        }
    }

    /// Copy mode the server entered
    pub fn status(&self) -> ResultStatus {
        self.response.status()
    }

    /// Whether the payload uses the binary COPY format
    pub fn is_binary(&self) -> bool {
        self.response
            .copy_response()
            .map_or(false, |r| r.is_binary())
    }

    /// Per-column format codes announced by the server
    pub fn column_formats(&self) -> &[i16] {
        self.response
            .copy_response()
            .map(|r| r.column_formats.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the server already sent CopyDone and the command completed
    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }

    /// Next chunk of COPY TO STDOUT data; `Ok(None)` after the last one.
    ///
    /// The end of data also completes the command, so a server error raised
    /// mid-transfer is returned here.
    pub async fn read_data(&mut self) -> Result<Option<Bytes>> {
        if self.completion.is_some() {
            return Ok(None);
        }
        let connection = self.guard.connection()?;
        match connection.read_copy_data().await? {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                self.completion = Some(connection.finish_copy().await?);
                Ok(None)
            }
        }
    }

    /// Send one chunk of COPY FROM STDIN data
    pub async fn write_data(&mut self, data: impl Into<Bytes>) -> Result<()> {
        if self.completion.is_some() {
            return Err(Error::InvalidState {
                expected: "copy_in".into(),
                actual: "copy complete".into(),
            });
        }
        self.guard.connection()?.write_copy_data(data.into()).await
    }

    /// Complete the copy and return the number of rows copied.
    ///
    /// Remaining COPY TO STDOUT data is skipped.
    pub async fn finish(mut self) -> Result<u64> {
        let completion = match self.completion.take() {
            Some(done) => done,
            None => self.guard.connection()?.finish_copy().await?,
        };
        Ok(completion.affected_rows().unwrap_or(0))
    }

    /// Abort the copy. The server rolls back a COPY FROM STDIN.
    pub async fn fail(mut self, reason: &str) -> Result<()> {
        if self.completion.is_some() {
            return Ok(());
        }
        self.guard.connection()?.fail_copy(reason).await
    }

    /// COPY TO STDOUT data as a stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut transfer = state?;
            match transfer.read_data().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(transfer))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl Drop for CopyTransfer {
    fn drop(&mut self) {
        if self.completion.is_none() {
            if let Ok(connection) = self.guard.connection() {
                if connection.state().is_copy() {
                    tracing::debug!(
                        status = %self.response.status(),
                        "COPY transfer dropped before completion"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for CopyTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyTransfer")
            .field("status", &self.status())
            .field("complete", &self.is_complete())
            .finish()
    }
}
