//! Maps wire requests onto engine calls and engine results back onto replies.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use tessera_core::{Engine, EngineResult, KeyValue, Lookup, RequestContext};

use crate::api::{ErrorBody, Reply, ReplyEnvelope, Request, RequestEnvelope, Response, WireEntry};

/// Request handler shared by every connection worker.
pub struct KvService {
    engine: Arc<Engine>,
    default_timeout: Duration,
}

impl KvService {
    pub fn new(engine: Arc<Engine>, default_timeout: Duration) -> Self {
        Self { engine, default_timeout }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Execute one request under its own deadline.
    pub fn handle(&self, envelope: RequestEnvelope) -> ReplyEnvelope {
        let timeout = envelope.timeout_ms.map_or(self.default_timeout, Duration::from_millis);
        let ctx = RequestContext::with_timeout(timeout);
        let op = envelope.request.op();

        let reply = match self.execute(&ctx, envelope.request) {
            Ok(response) => Reply::Ok(response),
            Err(err) => {
                tracing::debug!(request_id = ctx.request_id, op, kind = err.code(), "request failed");
                Reply::Error(ErrorBody::from(&err))
            }
        };
        ReplyEnvelope { id: envelope.id, reply }
    }

    /// Decode a JSON frame, execute it, and encode the reply.
    pub fn handle_line(&self, line: &str) -> String {
        let reply = match serde_json::from_str::<RequestEnvelope>(line) {
            Ok(envelope) => self.handle(envelope),
            Err(err) => ReplyEnvelope { id: 0, reply: Reply::Error(ErrorBody::malformed(err.to_string())) },
        };
        serde_json::to_string(&reply).unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to encode reply");
            format!(
                r#"{{"id":{},"reply":{{"error":{{"kind":"internal","message":"reply encoding failed","retryable":false}}}}}}"#,
                reply.id
            )
        })
    }

    fn execute(&self, ctx: &RequestContext, request: Request) -> EngineResult<Response> {
        let engine = &self.engine;
        let response = match request {
            Request::Put { key, value } => {
                engine.put(ctx, &key, &value)?;
                Response::Put { message: "Successfully put key".to_string() }
            }
            Request::Get { key } => match engine.get(ctx, &key)? {
                Lookup::Found(value) => Response::Get {
                    value,
                    found: true,
                    message: "Successfully retrieved key".to_string(),
                },
                Lookup::NotFound => Response::Get {
                    value: Vec::new(),
                    found: false,
                    message: "Key not found".to_string(),
                },
            },
            Request::Delete { key } => {
                engine.delete(ctx, &key)?;
                Response::Delete { message: "Successfully deleted key".to_string() }
            }
            Request::BatchPut { entries } => {
                let entries: Vec<KeyValue> = entries.into_iter().map(KeyValue::from).collect();
                let outcome = engine.batch_put(ctx, &entries)?;
                Response::BatchPut {
                    success_count: outcome.success_count as u64,
                    failure_count: outcome.failure_count as u64,
                    message: format!(
                        "Successfully put {} keys, {} failures",
                        outcome.success_count, outcome.failure_count
                    ),
                }
            }
            Request::BatchGet { keys } => {
                let result = engine.batch_get(ctx, &keys)?;
                let mut found: Vec<WireEntry> = result
                    .found
                    .into_iter()
                    .map(|(key, value)| WireEntry { key, value })
                    .collect();
                found.sort_by(|a, b| a.key.cmp(&b.key));
                let message = format!("Retrieved {} keys, {} missing", found.len(), result.missing.len());
                Response::BatchGet { found, missing: result.missing, message }
            }
            Request::BatchDelete { keys } => {
                let outcome = engine.batch_delete(ctx, &keys)?;
                Response::BatchDelete {
                    success_count: outcome.success_count as u64,
                    failure_count: outcome.failure_count as u64,
                    message: format!(
                        "Successfully deleted {} keys, {} failures",
                        outcome.success_count, outcome.failure_count
                    ),
                }
            }
            Request::PrefixScan { prefix, limit } => {
                let entries = wire_entries(engine.prefix_scan(ctx, &prefix, limit)?);
                let message = format!(
                    "Found {} entries with prefix '{}'",
                    entries.len(),
                    String::from_utf8_lossy(&prefix)
                );
                Response::PrefixScan { entries, message }
            }
            Request::RangeScan { start_key, end_key, limit } => {
                let entries = wire_entries(engine.range_scan(ctx, &start_key, &end_key, limit)?);
                let message = format!(
                    "Found {} entries in range from '{}' to '{}'",
                    entries.len(),
                    String::from_utf8_lossy(&start_key),
                    String::from_utf8_lossy(&end_key)
                );
                Response::RangeScan { entries, message }
            }
            Request::GetStats => {
                let stats = engine.stats(ctx)?;
                let last_accessed_ms = stats
                    .last_accessed
                    .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
                    .map(|since| since.as_millis() as u64);
                Response::GetStats {
                    message: format!(
                        "Database contains approximately {} keys, estimated size: {} bytes",
                        stats.total_keys, stats.total_size_bytes
                    ),
                    total_keys: stats.total_keys,
                    total_size_bytes: stats.total_size_bytes,
                    db_path: stats.location,
                    total_operations: stats.total_operations,
                    last_accessed_ms,
                }
            }
        };
        Ok(response)
    }
}

fn wire_entries(entries: Vec<KeyValue>) -> Vec<WireEntry> {
    entries.into_iter().map(WireEntry::from).collect()
}
