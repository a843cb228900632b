//! Ingest job
//!
//! Owns the lifecycle of one upload: `queued -> processing -> (completed |
//! failed)`. Rows are processed strictly in file order; the downstream
//! create-or-update logic is not idempotent-safe under concurrent writes to
//! the same external identifier space, so persistence is never parallelized.
//! A snapshot goes to the publisher after every row. Row-level failures are
//! captured as outcomes and never abort the job; only a job-level fault
//! (unreadable source, code-book load failure) transitions it to `failed`.

use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::store::{GroupDirectory, PersistError, StudentStore};

use super::publisher::{ProgressPublisher, StreamMessage};
use super::registry::JobHandle;
use super::row::{self, RowCheck};
use super::types::{OutcomeKind, RowOutcome};

/// Everything one ingest run needs besides its own state.
#[derive(Clone)]
pub struct IngestContext {
    pub publisher: Arc<ProgressPublisher>,
    pub store: Arc<dyn StudentStore>,
    pub directory: Arc<dyn GroupDirectory>,
}

/// Build a CSV reader with the settings shared by the pre-scan and the job.
///
/// `flexible` so a row with the wrong column count reaches the validator as
/// a row-level rejection instead of killing the reader.
pub fn csv_reader(data: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data)
}

/// Count the data rows of an uploaded file without retaining them.
///
/// Errors mean the file is unreadable as CSV; the caller rejects the upload
/// before any job exists.
pub fn count_data_rows(data: &[u8]) -> Result<u64, csv::Error> {
    let mut reader = csv_reader(data);
    let mut count = 0u64;
    for record in reader.records() {
        record?;
        count += 1;
    }
    Ok(count)
}

/// Run one ingest job to its terminal state.
///
/// Spawned on its own task by the upload adapter; independent of any
/// observer, so a disconnecting client never cancels the import.
pub async fn run(ctx: IngestContext, upload_id: String, handle: JobHandle, data: Vec<u8>) {
    info!(upload_id = %upload_id, bytes = data.len(), "import job starting");

    let codes = match ctx.directory.load_code_book().await {
        Ok(codes) => codes,
        Err(e) => {
            fail(&ctx, &upload_id, &handle, format!("could not load group codes: {}", e)).await;
            return;
        },
    };

    {
        let mut job = handle.write().await;
        job.begin();
        let snapshot = job.next_snapshot();
        drop(job);
        ctx.publisher
            .publish(&upload_id, StreamMessage::Progress(snapshot))
            .await;
    }

    let mut reader = csv_reader(&data);
    let mut row_number = 0u64;

    for record in reader.records() {
        row_number += 1;
        let started = Instant::now();

        let outcome = match record {
            Err(e) => RowOutcome {
                row: row_number,
                subject: format!("row {}", row_number),
                kind: OutcomeKind::Error,
                message: format!("unparseable row: {}", e),
                duration_ms: elapsed_ms(started),
            },
            Ok(record) => {
                let subject = row::subject_label(&record, row_number);
                match row::validate_record(&record, row_number, &codes) {
                    RowCheck::Blank => RowOutcome {
                        row: row_number,
                        subject,
                        kind: OutcomeKind::Skipped,
                        message: "blank row".to_string(),
                        duration_ms: elapsed_ms(started),
                    },
                    RowCheck::Rejected(rejection) => RowOutcome {
                        row: row_number,
                        subject,
                        kind: OutcomeKind::Error,
                        message: rejection.reason,
                        duration_ms: elapsed_ms(started),
                    },
                    RowCheck::Valid(valid) => {
                        match ctx.store.upsert_by_external_id(&valid).await {
                            Ok(upsert) => RowOutcome {
                                row: row_number,
                                subject: valid.full_name(),
                                kind: OutcomeKind::Success,
                                message: if upsert.created {
                                    "created".to_string()
                                } else {
                                    "updated existing record".to_string()
                                },
                                duration_ms: elapsed_ms(started),
                            },
                            Err(e @ PersistError::Conflict(_)) => RowOutcome {
                                row: row_number,
                                subject: valid.full_name(),
                                kind: OutcomeKind::Error,
                                message: e.to_string(),
                                duration_ms: elapsed_ms(started),
                            },
                            Err(e) => {
                                warn!(upload_id = %upload_id, row = row_number, error = %e,
                                    "store write failed");
                                RowOutcome {
                                    row: row_number,
                                    subject: valid.full_name(),
                                    kind: OutcomeKind::Error,
                                    message: e.to_string(),
                                    duration_ms: elapsed_ms(started),
                                }
                            },
                        }
                    },
                }
            },
        };

        let snapshot = {
            let mut job = handle.write().await;
            job.record(outcome);
            job.next_snapshot()
        };
        ctx.publisher
            .publish(&upload_id, StreamMessage::Progress(snapshot))
            .await;
    }

    let snapshot = {
        let mut job = handle.write().await;
        job.complete();
        job.next_snapshot()
    };
    info!(
        upload_id = %upload_id,
        total = snapshot.total,
        success = snapshot.success,
        error = snapshot.error,
        skipped = snapshot.skipped,
        "import job completed"
    );
    ctx.publisher
        .publish(&upload_id, StreamMessage::Completed(snapshot))
        .await;
}

async fn fail(ctx: &IngestContext, upload_id: &str, handle: &JobHandle, message: String) {
    error!(upload_id = %upload_id, message = %message, "import job failed");
    {
        let mut job = handle.write().await;
        job.fail(message.clone());
        job.next_snapshot();
    }
    ctx.publisher
        .publish(upload_id, StreamMessage::Error { message })
        .await;
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
