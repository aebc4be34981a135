//! Scripted in-memory transport shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use rextract::http::{RangeResponse, Transport};

/// A scripted response slot consumed before real data is served.
#[derive(Debug, Clone)]
pub enum Script {
    /// Transport-level failure (no HTTP response at all).
    Fail(&'static str),
    /// HTTP 429 with an optional `Retry-After` value.
    RateLimit(Option<u64>),
    /// Arbitrary HTTP status with an empty body.
    Status(u16),
}

/// Transport over an in-memory buffer that honors range requests,
/// plays back scripted failures first, and logs every request.
pub struct MockTransport {
    data: Vec<u8>,
    script: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl MockTransport {
    pub fn new(data: Vec<u8>) -> Self {
        MockTransport {
            data,
            script: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue scripted responses; they are consumed in order, one per
    /// request, before the transport starts serving real data.
    pub fn with_script(data: Vec<u8>, script: impl IntoIterator<Item = Script>) -> Self {
        let transport = Self::new(data);
        transport.script.lock().unwrap().extend(script);
        transport
    }

    /// Shared handle to the request log, usable after the transport has
    /// been boxed into a stream.
    pub fn request_log(&self) -> Arc<Mutex<Vec<(u64, u64)>>> {
        Arc::clone(&self.requests)
    }

    /// Shared handle to the script queue, so tests can inject scripted
    /// responses after the stream has already been opened.
    pub fn script_handle(&self) -> Arc<Mutex<VecDeque<Script>>> {
        Arc::clone(&self.script)
    }
}

impl Transport for MockTransport {
    fn get_range(&self, start: u64, end: u64) -> Result<RangeResponse, String> {
        self.requests.lock().unwrap().push((start, end));

        if let Some(step) = self.script.lock().unwrap().pop_front() {
            return match step {
                Script::Fail(message) => Err(message.to_string()),
                Script::RateLimit(retry_after) => Ok(RangeResponse {
                    status: 429,
                    total_size: None,
                    content_length: None,
                    retry_after,
                    body: Bytes::new(),
                }),
                Script::Status(status) => Ok(RangeResponse {
                    status,
                    total_size: None,
                    content_length: None,
                    retry_after: None,
                    body: Bytes::new(),
                }),
            };
        }

        let len = self.data.len() as u64;
        let body = if start >= len {
            Bytes::new()
        } else {
            let end = end.min(len - 1);
            Bytes::copy_from_slice(&self.data[start as usize..=end as usize])
        };

        Ok(RangeResponse {
            status: 206,
            total_size: Some(len),
            content_length: Some(body.len() as u64),
            retry_after: None,
            body,
        })
    }
}
