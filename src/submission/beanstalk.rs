//! beanstalkd producer over the text protocol.
//!
//! Only the commands a producer needs are implemented:
//!
//! - `use <tube>` → `USING <tube>`
//! - `put <pri> <delay> <ttr> <bytes>` + body → `INSERTED <id>`
//! - `quit`
//!
//! # Message body
//!
//! beanstalkd has no notion of a message lifetime, so the body is a JSON
//! object carrying the validity next to the payload:
//!
//! ```text
//! {"id":"42","tube":"work","ttr":3600,"validity":7200,
//!  "expires_at":"2024-01-01T02:00:00Z","payload":{...}}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Service, SubmitError};

use super::broker::{BrokerConnector, OutgoingJob, QueueProducer};
use super::job::JobPayload;
use super::target::ConnectionTarget;

/// Longest tube name beanstalkd accepts.
pub const MAX_TUBE_NAME_LEN: usize = 200;

/// Connects to beanstalkd.
#[derive(Debug, Clone, Default)]
pub struct BeanstalkConnector;

impl BeanstalkConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerConnector for BeanstalkConnector {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        tube: &str,
        connect_timeout: Option<Duration>,
    ) -> Result<Box<dyn QueueProducer>, SubmitError> {
        validate_tube_name(tube)?;

        let connecting = TcpStream::connect((target.host.as_str(), target.port));
        let stream = match connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting).await.map_err(|_| {
                SubmitError::connectivity(
                    Service::Broker,
                    format!("{}: connect timed out after {:?}", target, limit),
                )
            })?,
            None => connecting.await,
        }
        .map_err(|e| SubmitError::connectivity(Service::Broker, format!("{}: {}", target, e)))?;

        debug!(%target, "connected to beanstalkd");

        let mut producer = BeanstalkProducer {
            stream: BufReader::new(stream),
            tube: tube.to_string(),
        };
        producer.use_tube().await?;

        Ok(Box::new(producer))
    }
}

/// A producer connection with its tube selected.
pub struct BeanstalkProducer {
    stream: BufReader<TcpStream>,
    tube: String,
}

impl BeanstalkProducer {
    async fn use_tube(&mut self) -> Result<(), SubmitError> {
        let command = format!("use {}\r\n", self.tube);
        self.stream.write_all(command.as_bytes()).await.map_err(io_error)?;
        self.stream.flush().await.map_err(io_error)?;

        let reply = self.read_reply().await?;
        match reply.strip_prefix("USING ") {
            Some(tube) if tube == self.tube => {
                debug!(tube = %self.tube, "using tube");
                Ok(())
            }
            _ => Err(reply_error("use", &reply)),
        }
    }

    async fn read_reply(&mut self) -> Result<String, SubmitError> {
        let mut line = String::new();
        let read = self.stream.read_line(&mut line).await.map_err(io_error)?;
        if read == 0 {
            return Err(SubmitError::connectivity(
                Service::Broker,
                "connection closed by server",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl QueueProducer for BeanstalkProducer {
    async fn push(&mut self, job: &OutgoingJob) -> Result<u64, SubmitError> {
        let body = encode_body(&self.tube, job, Utc::now())?;

        let mut frame = format!(
            "put {} {} {} {}\r\n",
            job.priority,
            job.delay,
            job.ttr,
            body.len()
        )
        .into_bytes();
        frame.extend_from_slice(&body);
        frame.extend_from_slice(b"\r\n");

        self.stream.write_all(&frame).await.map_err(io_error)?;
        self.stream.flush().await.map_err(io_error)?;

        let reply = self.read_reply().await?;
        match reply.strip_prefix("INSERTED ") {
            Some(id) => {
                let id = id.parse::<u64>().map_err(|_| reply_error("put", &reply))?;
                debug!(tube = %self.tube, broker_job_id = id, job_id = %job.id, "job inserted");
                Ok(id)
            }
            None => Err(reply_error("put", &reply)),
        }
    }

    async fn disconnect(self: Box<Self>) -> Result<(), SubmitError> {
        let mut stream = self.stream;
        stream.write_all(b"quit\r\n").await.map_err(io_error)?;
        stream.flush().await.map_err(io_error)?;
        stream.get_mut().shutdown().await.map_err(io_error)?;
        debug!("disconnected from beanstalkd");
        Ok(())
    }
}

#[derive(Serialize)]
struct MessageBody<'a> {
    id: &'a str,
    tube: &'a str,
    ttr: u64,
    validity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    payload: &'a JobPayload,
}

/// Serializes the message body for `job` on `tube`, stamped relative to `now`.
pub fn encode_body(
    tube: &str,
    job: &OutgoingJob,
    now: DateTime<Utc>,
) -> Result<Vec<u8>, SubmitError> {
    let expires_at = i64::try_from(job.validity)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|validity| now.checked_add_signed(validity))
        .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));

    let body = MessageBody {
        id: &job.id,
        tube,
        ttr: job.ttr,
        validity: job.validity,
        expires_at,
        payload: &job.payload,
    };

    serde_json::to_vec(&body).map_err(|e| {
        SubmitError::protocol(Service::Broker, format!("failed to encode job body: {}", e))
    })
}

/// Checks `name` against beanstalkd's tube naming rules.
pub fn validate_tube_name(name: &str) -> Result<(), SubmitError> {
    let valid_char =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '/' | ';' | '.' | '$' | '_' | '(' | ')');

    let valid = !name.is_empty()
        && name.len() <= MAX_TUBE_NAME_LEN
        && !name.starts_with('-')
        && name.chars().all(valid_char);

    if valid {
        Ok(())
    } else {
        Err(SubmitError::protocol(
            Service::Broker,
            format!("invalid tube name '{}'", name),
        ))
    }
}

fn io_error(err: std::io::Error) -> SubmitError {
    SubmitError::connectivity(Service::Broker, err.to_string())
}

fn reply_error(command: &str, reply: &str) -> SubmitError {
    let reason = match reply.split_whitespace().next().unwrap_or_default() {
        "BURIED" => "server out of memory, job buried",
        "EXPECTED_CRLF" => "job body not terminated",
        "JOB_TOO_BIG" => "job body exceeds max-job-size",
        "DRAINING" => "server is draining",
        "BAD_FORMAT" => "malformed command",
        "UNKNOWN_COMMAND" => "unknown command",
        "OUT_OF_MEMORY" => "server out of memory",
        "INTERNAL_ERROR" => "server internal error",
        _ => "unexpected reply",
    };
    SubmitError::protocol(
        Service::Broker,
        format!("{} rejected: {} ({})", command, reason, reply),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::job::{JobId, JobTiming};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    #[test]
    fn test_tube_names() {
        assert!(validate_tube_name("work").is_ok());
        assert!(validate_tube_name("a-b+c/d;e.f$g_h(i)").is_ok());
        assert!(validate_tube_name("").is_err());
        assert!(validate_tube_name("-work").is_err());
        assert!(validate_tube_name("with space").is_err());
        assert!(validate_tube_name(&"x".repeat(MAX_TUBE_NAME_LEN)).is_ok());
        assert!(validate_tube_name(&"x".repeat(MAX_TUBE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_encode_body_with_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("priority".to_string(), "5".to_string());
        let timing = JobTiming::new(10, 20).unwrap();
        let job = OutgoingJob::new(JobId::new(9), JobPayload::Fields(fields), &timing);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let body = encode_body("work", &job, now).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(
            parsed,
            serde_json::json!({
                "id": "9",
                "tube": "work",
                "ttr": 10,
                "validity": 20,
                "expires_at": "2024-01-01T00:00:20Z",
                "payload": {"priority": "5"}
            })
        );
    }

    #[test]
    fn test_encode_body_with_json_payload() {
        let payload = JobPayload::from_json(r#"{"task":"resize"}"#).unwrap();
        let job = OutgoingJob::new(JobId::new(1), payload, &JobTiming::default());
        let body = encode_body("work", &job, Utc::now()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(parsed["payload"]["task"], "resize");
        assert_eq!(parsed["validity"], 7200);
    }

    #[test]
    fn test_encode_body_keeps_json_payload_verbatim() {
        let raw = r#"{"zeta":1,"alpha":123456789012345678901234567890,"f":0.1000000000000000055511151231257827}"#;
        let payload = JobPayload::from_json(raw).unwrap();
        let job = OutgoingJob::new(JobId::new(1), payload, &JobTiming::default());

        let body = String::from_utf8(encode_body("work", &job, Utc::now()).unwrap()).unwrap();
        let start = body.find(r#""payload":"#).expect("payload field") + r#""payload":"#.len();
        assert_eq!(&body[start..start + raw.len()], raw);
        assert_eq!(&body[start + raw.len()..], "}");
    }

    #[test]
    fn test_encode_body_omits_unrepresentable_expiry() {
        let mut job = OutgoingJob::new(JobId::new(1), JobPayload::default(), &JobTiming::default());
        job.validity = u64::MAX;
        let body = encode_body("work", &job, Utc::now()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed.get("expires_at").is_none());
    }

    #[test]
    fn test_reply_error_is_protocol() {
        let err = reply_error("put", "JOB_TOO_BIG");
        assert!(err.is_protocol());
        assert!(err.to_string().contains("max-job-size"));
    }

    #[tokio::test]
    async fn test_invalid_tube_rejected_before_connecting() {
        // Nothing listens on port 1; a tube error proves no connect happened.
        let target = ConnectionTarget::new("127.0.0.1", 1);
        let result = BeanstalkConnector::new()
            .connect(&target, "bad tube", None)
            .await;
        match result {
            Err(err) => assert!(err.is_protocol()),
            Ok(_) => panic!("Expected tube name to be rejected"),
        }
    }
}
