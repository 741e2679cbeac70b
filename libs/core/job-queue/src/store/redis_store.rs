//! Redis Streams queue store
//!
//! Key layout for a queue named `q`:
//! - `q:stream`    ready job ids (field `job`), consumed by group `q:workers`
//! - `q:job:{id}`  hash holding the job record
//! - `q:delayed`   sorted set of job ids scored by due time in ms
//! - `q:dlq`       dead letters (field `data`), trimmed by age
//!
//! A lease is a stream entry delivered to a consumer and not yet acknowledged.
//! Expired leases are reclaimed with `XAUTOCLAIM` using the lease timeout as
//! the minimum idle time, so only one consumer can win each redelivery.
//!
//! The job stream is never trimmed. Enqueue is refused once `max_length`
//! jobs are unresolved instead.
//!
//! Every state change is a Lua script guarded by the `status` and `attempt`
//! read just before it. If another consumer moved the job in between, the
//! script changes nothing and the caller sees a stale lease.

use super::{QueueStats, QueueStore};
use crate::config::QueueConfig;
use crate::error::StoreError;
use crate::job::{DeadLetter, Job, JobId, JobStatus, LeaseRef, Resolution};
use crate::metrics::QueueMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_config::redis::RedisConfig;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamRangeReply, StreamReadReply};
use redis::{Client, RedisResult, Script};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Upper bound on stream entries inspected by a single lease call.
const MAX_SCAN: usize = 16;

/// Due retries moved back to the stream per lease call.
const PROMOTE_BATCH: usize = 100;

/// Stores the job hash and appends its id, unless the backlog is full.
/// Returns -1 when accepted, otherwise the current backlog.
const ENQUEUE_SCRIPT: &str = r"
local backlog = redis.call('XLEN', KEYS[2]) + redis.call('ZCARD', KEYS[3])
if backlog >= tonumber(ARGV[1]) then
    return backlog
end
redis.call('HSET', KEYS[1], 'id', ARGV[2], 'kind', ARGV[3], 'payload', ARGV[4],
    'attempt', ARGV[5], 'max_attempts', ARGV[6], 'status', ARGV[7], 'enqueued_at', ARGV[8])
redis.call('XADD', KEYS[2], '*', 'job', ARGV[2])
return -1
";

/// Atomically moves due job ids from the delayed set to the stream tail.
const PROMOTE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('XADD', KEYS[2], '*', 'job', id)
end
return #due
";

// Shared argument layout of the guarded scripts:
// ARGV[1] expected status, ARGV[2] expected attempt,
// ARGV[3] consumer group, ARGV[4] stream entry to release ('' for none).

/// Leases the job for a delivered entry. Returns the new attempt, or 0.
const CLAIM_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'status') ~= ARGV[1]
    or redis.call('HGET', KEYS[1], 'attempt') ~= ARGV[2] then
    return 0
end
local attempt = redis.call('HINCRBY', KEYS[1], 'attempt', 1)
redis.call('HSET', KEYS[1], 'status', ARGV[5], 'leased_at', ARGV[6], 'entry', ARGV[4])
return attempt
";

/// Completes a leased job. Returns 1, or 0 when the guard failed.
const ACK_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'status') ~= ARGV[1]
    or redis.call('HGET', KEYS[1], 'attempt') ~= ARGV[2] then
    return 0
end
if ARGV[4] ~= '' then
    redis.call('XACK', KEYS[2], ARGV[3], ARGV[4])
    redis.call('XDEL', KEYS[2], ARGV[4])
end
redis.call('HSET', KEYS[1], 'status', ARGV[5])
redis.call('HDEL', KEYS[1], 'entry')
redis.call('EXPIRE', KEYS[1], ARGV[6])
return 1
";

/// Returns a leased job to the delayed set. Returns 1, or 0.
const RETRY_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'status') ~= ARGV[1]
    or redis.call('HGET', KEYS[1], 'attempt') ~= ARGV[2] then
    return 0
end
if ARGV[4] ~= '' then
    redis.call('XACK', KEYS[2], ARGV[3], ARGV[4])
    redis.call('XDEL', KEYS[2], ARGV[4])
end
redis.call('HSET', KEYS[1], 'status', ARGV[5], 'last_error', ARGV[6])
redis.call('HDEL', KEYS[1], 'entry')
redis.call('ZADD', KEYS[3], ARGV[7], ARGV[8])
return 1
";

/// Dead-letters a job and records it in the DLQ stream. Returns 1, or 0.
const DEAD_LETTER_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'status') ~= ARGV[1]
    or redis.call('HGET', KEYS[1], 'attempt') ~= ARGV[2] then
    return 0
end
if ARGV[4] ~= '' then
    redis.call('XACK', KEYS[2], ARGV[3], ARGV[4])
    redis.call('XDEL', KEYS[2], ARGV[4])
end
redis.call('HSET', KEYS[1], 'status', ARGV[5], 'last_error', ARGV[6])
redis.call('HDEL', KEYS[1], 'entry')
redis.call('EXPIRE', KEYS[1], ARGV[7])
redis.call('ZREM', KEYS[3], ARGV[8])
redis.call('XADD', KEYS[4], 'MINID', '~', ARGV[9], '*', 'data', ARGV[10])
return 1
";

struct Keys {
    stream: String,
    delayed: String,
    dlq: String,
    group: String,
    job_prefix: String,
}

impl Keys {
    fn new(config: &QueueConfig) -> Self {
        Self {
            stream: format!("{}:stream", config.name),
            delayed: format!("{}:delayed", config.name),
            dlq: format!("{}:dlq", config.name),
            group: config.consumer_group(),
            job_prefix: format!("{}:job:", config.name),
        }
    }

    fn job(&self, id: &JobId) -> String {
        format!("{}{}", self.job_prefix, id)
    }
}

struct Scripts {
    enqueue: Script,
    promote: Script,
    claim: Script,
    ack: Script,
    retry: Script,
    dead_letter: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE_SCRIPT),
            promote: Script::new(PROMOTE_SCRIPT),
            claim: Script::new(CLAIM_SCRIPT),
            ack: Script::new(ACK_SCRIPT),
            retry: Script::new(RETRY_SCRIPT),
            dead_letter: Script::new(DEAD_LETTER_SCRIPT),
        }
    }
}

/// Queue store backed by Redis Streams.
pub struct RedisStore {
    client: Client,
    conn: RwLock<Option<MultiplexedConnection>>,
    config: QueueConfig,
    keys: Keys,
    metrics: QueueMetrics,
    scripts: Scripts,
}

impl RedisStore {
    /// Create a store for the given connection settings. Does not connect.
    pub fn new(redis: &RedisConfig, config: QueueConfig) -> Result<Self, StoreError> {
        let client = Client::open(redis.url())?;
        Ok(Self::from_client(client, config))
    }

    pub fn from_client(client: Client, config: QueueConfig) -> Self {
        Self {
            client,
            conn: RwLock::new(None),
            keys: Keys::new(&config),
            metrics: QueueMetrics::new(&config.name),
            scripts: Scripts::new(),
            config,
        }
    }

    /// Stream holding ready job ids.
    pub fn stream_key(&self) -> &str {
        &self.keys.stream
    }

    /// Stream holding dead letters.
    pub fn dlq_key(&self) -> &str {
        &self.keys.dlq
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::Connection("not connected".into()))
    }

    /// Create the consumer group if it doesn't exist
    async fn ensure_group(&self, conn: &mut MultiplexedConnection) -> Result<(), StoreError> {
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.keys.stream)
            .arg(&self.keys.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.keys.stream,
                    group = %self.keys.group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(group = %self.keys.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(
        &self,
        conn: &mut MultiplexedConnection,
        id: &JobId,
    ) -> Result<Option<StoredJob>, StoreError> {
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.keys.job(id))
            .query_async(conn)
            .await?;
        decode_job(fields)
    }

    async fn promote_due(&self, conn: &mut MultiplexedConnection) -> Result<(), StoreError> {
        let promoted: i64 = self
            .scripts
            .promote
            .key(&self.keys.delayed)
            .key(&self.keys.stream)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(conn)
            .await?;

        if promoted > 0 {
            debug!(count = promoted, "Promoted due retries");
        }
        Ok(())
    }

    async fn claim_expired(
        &self,
        conn: &mut MultiplexedConnection,
        consumer: &str,
    ) -> Result<Option<StreamId>, StoreError> {
        let reply: RedisResult<StreamAutoClaimReply> = redis::cmd("XAUTOCLAIM")
            .arg(&self.keys.stream)
            .arg(&self.keys.group)
            .arg(consumer)
            .arg(self.config.lease_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(conn)
            .await;

        match reply {
            Ok(reply) => Ok(reply.claimed.into_iter().next()),
            Err(e) if e.to_string().contains("NOGROUP") => {
                self.ensure_group(conn).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_new(
        &self,
        conn: &mut MultiplexedConnection,
        consumer: &str,
    ) -> Result<Option<StreamId>, StoreError> {
        let reply: RedisResult<Option<StreamReadReply>> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.keys.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(&self.keys.stream)
            .arg(">")
            .query_async(conn)
            .await;

        match reply {
            Ok(Some(reply)) => Ok(reply
                .keys
                .into_iter()
                .flat_map(|key| key.ids)
                .next()),
            Ok(None) => Ok(None),
            Err(e) if e.to_string().contains("NOGROUP") => {
                self.ensure_group(conn).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Turn a delivered stream entry into a lease, or resolve it when it no
    /// longer refers to a leasable job.
    async fn take_entry(
        &self,
        conn: &mut MultiplexedConnection,
        entry: StreamId,
        redelivery: bool,
    ) -> Result<Option<Job>, StoreError> {
        let job_id = entry
            .get::<String>("job")
            .and_then(|raw| raw.parse::<JobId>().ok());
        let Some(job_id) = job_id else {
            warn!(entry = %entry.id, "Stream entry without a valid job id, dropping");
            self.drop_entry(conn, &entry.id).await?;
            return Ok(None);
        };

        let Some(StoredJob { mut job, .. }) = self.load(conn, &job_id).await? else {
            warn!(job_id = %job_id, entry = %entry.id, "Job record missing, dropping entry");
            self.drop_entry(conn, &entry.id).await?;
            return Ok(None);
        };

        if job.status.is_terminal() {
            self.drop_entry(conn, &entry.id).await?;
            return Ok(None);
        }

        // A reclaimed entry still `Pending` was delivered but never marked
        // leased, so it is leased like a fresh one.
        if redelivery && job.status == JobStatus::Leased {
            if job.attempts_exhausted() {
                let reason = format!("lease expired after {} attempts", job.attempt);
                let resolution = self
                    .dead_letter(conn, &mut job, Some(entry.id.as_str()), &reason)
                    .await?;
                if resolution != Resolution::Missing {
                    warn!(job_id = %job.id, %reason, "Dead-lettered job with expired final lease");
                    self.metrics.job_dead_lettered(&job.kind, "lease_expired");
                }
                return Ok(None);
            }
            debug!(job_id = %job.id, "Redelivering job with expired lease");
            self.metrics.lease_expired();
        } else if job.status != JobStatus::Pending {
            self.drop_entry(conn, &entry.id).await?;
            return Ok(None);
        }

        let leased_at = Utc::now();
        let attempt: u32 = self
            .scripts
            .claim
            .key(self.keys.job(&job.id))
            .arg(job.status.as_ref())
            .arg(job.attempt)
            .arg(&self.keys.group)
            .arg(&entry.id)
            .arg(JobStatus::Leased.as_ref())
            .arg(leased_at.to_rfc3339())
            .invoke_async(conn)
            .await?;
        if attempt == 0 {
            debug!(job_id = %job.id, entry = %entry.id, "Job changed while claiming, skipping entry");
            return Ok(None);
        }

        job.attempt = attempt;
        job.status = JobStatus::Leased;
        job.leased_at = Some(leased_at);
        Ok(Some(job))
    }

    async fn drop_entry(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &str,
    ) -> Result<(), StoreError> {
        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.keys.stream)
            .arg(&self.keys.group)
            .arg(entry)
            .ignore()
            .cmd("XDEL")
            .arg(&self.keys.stream)
            .arg(entry)
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }

    /// Dead-letter `job`, guarded by the status and attempt it was loaded
    /// with. Returns `Missing` when the job moved on in the meantime.
    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        job: &mut Job,
        entry: Option<&str>,
        reason: &str,
    ) -> Result<Resolution, StoreError> {
        let expected = job.status;
        job.status = JobStatus::DeadLettered;
        job.last_error = Some(reason.to_string());

        let data = serde_json::to_string(&DeadLetter::from_job(job, reason))?;
        let retention = self.config.dead_letter_retention;
        let min_id = Utc::now()
            .timestamp_millis()
            .saturating_sub(retention.as_millis() as i64)
            .max(0);

        let applied: i64 = self
            .scripts
            .dead_letter
            .key(self.keys.job(&job.id))
            .key(&self.keys.stream)
            .key(&self.keys.delayed)
            .key(&self.keys.dlq)
            .arg(expected.as_ref())
            .arg(job.attempt)
            .arg(&self.keys.group)
            .arg(entry.unwrap_or(""))
            .arg(JobStatus::DeadLettered.as_ref())
            .arg(reason)
            .arg(retention.as_secs().max(1))
            .arg(job.id.to_string())
            .arg(min_id)
            .arg(&data)
            .invoke_async(conn)
            .await?;
        if applied == 0 {
            job.status = expected;
            return Ok(Resolution::Missing);
        }

        info!(job_id = %job.id, kind = %job.kind, attempt = job.attempt, %reason, "Moved job to dead-letter stream");
        Ok(Resolution::DeadLettered(reason.to_string()))
    }

    /// Load the job a resolution targets, or `None` when it is unknown, not
    /// in an allowed status, or pinned to another delivery.
    async fn load_target(
        &self,
        conn: &mut MultiplexedConnection,
        lease: LeaseRef,
        allowed: impl Fn(JobStatus) -> bool,
    ) -> Result<Option<StoredJob>, StoreError> {
        Ok(self
            .load(conn, &lease.id)
            .await?
            .filter(|stored| allowed(stored.job.status) && lease.matches(stored.job.attempt)))
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        self.ensure_group(&mut conn).await?;

        *self.conn.write().await = Some(conn);
        info!(stream = %self.keys.stream, "Connected to Redis");
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn enqueue(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&job.payload)?;

        let backlog: i64 = self
            .scripts
            .enqueue
            .key(self.keys.job(&job.id))
            .key(&self.keys.stream)
            .key(&self.keys.delayed)
            .arg(self.config.max_length)
            .arg(job.id.to_string())
            .arg(&job.kind)
            .arg(payload)
            .arg(job.attempt)
            .arg(job.max_attempts)
            .arg(job.status.as_ref())
            .arg(job.enqueued_at.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        if backlog >= 0 {
            return Err(StoreError::Full {
                backlog: backlog as u64,
                limit: self.config.max_length,
            });
        }
        Ok(())
    }

    async fn lease(&self, consumer: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.connection().await?;
        self.promote_due(&mut conn).await?;

        for _ in 0..MAX_SCAN {
            let Some(entry) = self.claim_expired(&mut conn, consumer).await? else {
                break;
            };
            if let Some(job) = self.take_entry(&mut conn, entry, true).await? {
                return Ok(Some(job));
            }
        }

        for _ in 0..MAX_SCAN {
            let Some(entry) = self.read_new(&mut conn, consumer).await? else {
                return Ok(None);
            };
            if let Some(job) = self.take_entry(&mut conn, entry, false).await? {
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    async fn ack(&self, lease: LeaseRef) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let Some(StoredJob { job, entry }) = self
            .load_target(&mut conn, lease, |status| status == JobStatus::Leased)
            .await?
        else {
            return Ok(false);
        };

        let applied: i64 = self
            .scripts
            .ack
            .key(self.keys.job(&job.id))
            .key(&self.keys.stream)
            .arg(job.status.as_ref())
            .arg(job.attempt)
            .arg(&self.keys.group)
            .arg(entry.as_deref().unwrap_or(""))
            .arg(JobStatus::Completed.as_ref())
            .arg(self.config.completed_retention.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;

        Ok(applied == 1)
    }

    async fn retry(
        &self,
        lease: LeaseRef,
        delay: Duration,
        reason: &str,
    ) -> Result<Resolution, StoreError> {
        let mut conn = self.connection().await?;
        let Some(StoredJob { mut job, entry }) = self
            .load_target(&mut conn, lease, |status| status == JobStatus::Leased)
            .await?
        else {
            return Ok(Resolution::Missing);
        };
        if job.attempts_exhausted() {
            return self
                .dead_letter(&mut conn, &mut job, entry.as_deref(), reason)
                .await;
        }

        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let applied: i64 = self
            .scripts
            .retry
            .key(self.keys.job(&job.id))
            .key(&self.keys.stream)
            .key(&self.keys.delayed)
            .arg(job.status.as_ref())
            .arg(job.attempt)
            .arg(&self.keys.group)
            .arg(entry.as_deref().unwrap_or(""))
            .arg(JobStatus::Pending.as_ref())
            .arg(reason)
            .arg(due)
            .arg(job.id.to_string())
            .invoke_async(&mut conn)
            .await?;

        if applied == 1 {
            Ok(Resolution::Rescheduled)
        } else {
            Ok(Resolution::Missing)
        }
    }

    async fn fail(&self, lease: LeaseRef, reason: &str) -> Result<Resolution, StoreError> {
        let mut conn = self.connection().await?;
        let Some(StoredJob { mut job, entry }) = self
            .load_target(&mut conn, lease, |status| !status.is_terminal())
            .await?
        else {
            return Ok(Resolution::Missing);
        };

        self.dead_letter(&mut conn, &mut job, entry.as_deref(), reason)
            .await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let mut conn = self.connection().await?;
        Ok(self.load(&mut conn, &id).await?.map(|stored| stored.job))
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let mut conn = self.connection().await?;

        let length: u64 = redis::cmd("XLEN")
            .arg(&self.keys.stream)
            .query_async(&mut conn)
            .await?;

        let pending: RedisResult<(u64, Option<String>, Option<String>, Option<Vec<(String, u64)>>)> =
            redis::cmd("XPENDING")
                .arg(&self.keys.stream)
                .arg(&self.keys.group)
                .query_async(&mut conn)
                .await;
        let leased = pending.map(|(count, _, _, _)| count).unwrap_or(0);

        let delayed: u64 = redis::cmd("ZCARD")
            .arg(&self.keys.delayed)
            .query_async(&mut conn)
            .await?;

        let dead_lettered: u64 = redis::cmd("XLEN")
            .arg(&self.keys.dlq)
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            pending: length.saturating_sub(leased),
            leased,
            delayed,
            dead_lettered,
        })
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        let mut conn = self.connection().await?;

        let reply: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(&self.keys.dlq)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut letters = Vec::with_capacity(reply.ids.len());
        for entry in reply.ids {
            let Some(data) = entry.get::<String>("data") else {
                warn!(entry = %entry.id, "Dead letter without data field, skipping");
                continue;
            };
            match serde_json::from_str::<DeadLetter>(&data) {
                Ok(letter) => letters.push(letter),
                Err(e) => warn!(entry = %entry.id, error = %e, "Failed to parse dead letter, skipping"),
            }
        }

        Ok(letters)
    }
}

/// A job record plus the stream entry currently leasing it.
struct StoredJob {
    job: Job,
    entry: Option<String>,
}

fn decode_job(mut fields: HashMap<String, String>) -> Result<Option<StoredJob>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| StoreError::Corrupt(format!("job record missing field '{name}'")))
    };

    let id = take("id")?
        .parse::<JobId>()
        .map_err(|e| StoreError::Corrupt(format!("invalid job id: {e}")))?;
    let kind = take("kind")?;
    let payload = serde_json::from_str(&take("payload")?)?;
    let attempt = parse_number(&take("attempt")?, "attempt")?;
    let max_attempts = parse_number(&take("max_attempts")?, "max_attempts")?;
    let status = take("status")?
        .parse::<JobStatus>()
        .map_err(|e| StoreError::Corrupt(format!("invalid status: {e}")))?;
    let enqueued_at = parse_time(&take("enqueued_at")?)?;
    let leased_at = take("leased_at").ok().map(|raw| parse_time(&raw)).transpose()?;
    let last_error = take("last_error").ok();
    let entry = take("entry").ok();

    Ok(Some(StoredJob {
        job: Job {
            id,
            kind,
            payload,
            attempt,
            max_attempts,
            status,
            enqueued_at,
            leased_at,
            last_error,
        },
        entry,
    }))
}

fn parse_number(raw: &str, field: &str) -> Result<u32, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("invalid {field}: {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(job: &Job) -> HashMap<String, String> {
        HashMap::from([
            ("id".to_string(), job.id.to_string()),
            ("kind".to_string(), job.kind.clone()),
            ("payload".to_string(), job.payload.to_string()),
            ("attempt".to_string(), "2".to_string()),
            ("max_attempts".to_string(), job.max_attempts.to_string()),
            ("status".to_string(), "leased".to_string()),
            ("enqueued_at".to_string(), job.enqueued_at.to_rfc3339()),
            ("entry".to_string(), "1700000000000-0".to_string()),
        ])
    }

    #[test]
    fn test_keys_layout() {
        let keys = Keys::new(&QueueConfig::new("notifications"));
        let id = JobId::new();

        assert_eq!(keys.stream, "notifications:stream");
        assert_eq!(keys.dlq, "notifications:dlq");
        assert_eq!(keys.delayed, "notifications:delayed");
        assert_eq!(keys.group, "notifications:workers");
        assert_eq!(keys.job(&id), format!("notifications:job:{id}"));
    }

    #[test]
    fn test_decode_job_record() {
        let job = Job::new("notify-admin", json!({"issue_id": "I1"}), 5);
        let stored = decode_job(record(&job)).unwrap().unwrap();

        assert_eq!(stored.job.id, job.id);
        assert_eq!(stored.job.attempt, 2);
        assert_eq!(stored.job.status, JobStatus::Leased);
        assert_eq!(stored.job.payload, job.payload);
        assert!(stored.job.leased_at.is_none());
        assert_eq!(stored.entry.as_deref(), Some("1700000000000-0"));
    }

    #[test]
    fn test_decode_empty_record_is_missing() {
        assert!(decode_job(HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_corrupt_record() {
        let job = Job::new("notify-admin", json!({}), 5);
        let mut fields = record(&job);
        fields.insert("status".to_string(), "exploded".to_string());
        assert!(matches!(decode_job(fields), Err(StoreError::Corrupt(_))));

        let mut fields = record(&job);
        fields.remove("kind");
        assert!(matches!(decode_job(fields), Err(StoreError::Corrupt(_))));
    }
}
