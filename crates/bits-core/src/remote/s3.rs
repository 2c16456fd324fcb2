use std::io::Read;
use std::time::Duration;

use rusty_s3::actions::{ListObjectsV2, S3Action};
use rusty_s3::{Bucket, Credentials, UrlStyle};
use tracing::debug;

use bits_types::{ChunkKey, KEY_HEX_LEN};

use crate::error::{BitsError, Result};
use crate::remote::Remote;

/// Validity window for presigned request URLs.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

/// Page size for bucket listings.
const LIST_PAGE_SIZE: usize = 500;

/// Chunk remote backed by an S3-compatible bucket. Objects are named by the
/// full hex form of their key, at the bucket root.
pub struct S3Remote {
    bucket: Bucket,
    credentials: Credentials,
    agent: ureq::Agent,
}

impl S3Remote {
    pub fn new(
        bucket_name: &str,
        domain: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self> {
        let endpoint = format!("https://{domain}")
            .parse()
            .map_err(|e| BitsError::Config(format!("invalid S3 domain '{domain}': {e}")))?;

        let bucket = Bucket::new(
            endpoint,
            UrlStyle::VirtualHost,
            bucket_name.to_string(),
            region.to_string(),
        )
        .map_err(|e| BitsError::Config(format!("failed to create S3 bucket handle: {e}")))?;

        let credentials = Credentials::new(access_key, secret_key);

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();

        Ok(Self {
            bucket,
            credentials,
            agent,
        })
    }
}

/// Counts bytes pulled through a reader, so uploads can report their size.
struct CountingReader<'a> {
    inner: &'a mut dyn Read,
    count: u64,
}

impl Read for CountingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

impl Remote for S3Remote {
    fn chunk_read(&self, key: &ChunkKey) -> Result<Box<dyn Read + Send>> {
        let url = self
            .bucket
            .get_object(Some(&self.credentials), &key.to_hex())
            .sign(PRESIGN_DURATION);

        match self.agent.get(url.as_str()).call() {
            Ok(resp) => Ok(Box::new(resp.into_reader())),
            Err(ureq::Error::Status(404, _)) => Err(BitsError::Remote(format!(
                "chunk {key} not found in bucket"
            ))),
            Err(e) => Err(BitsError::Remote(format!("S3 GET {key}: {e}"))),
        }
    }

    fn chunk_write(&self, key: &ChunkKey, body: &mut dyn Read) -> Result<u64> {
        let url = self
            .bucket
            .put_object(Some(&self.credentials), &key.to_hex())
            .sign(PRESIGN_DURATION);

        let mut counting = CountingReader {
            inner: body,
            count: 0,
        };
        self.agent
            .put(url.as_str())
            .send(&mut counting)
            .map_err(|e| BitsError::Remote(format!("S3 PUT {key}: {e}")))?;
        Ok(counting.count)
    }

    fn list_keys(&self, visit: &mut dyn FnMut(ChunkKey) -> Result<()>) -> Result<()> {
        let mut continuation_token: Option<String> = None;

        loop {
            let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
            action
                .query_mut()
                .insert("max-keys", LIST_PAGE_SIZE.to_string());
            if let Some(token) = &continuation_token {
                action.query_mut().insert("continuation-token", token);
            }
            let url = action.sign(PRESIGN_DURATION);

            let resp = self
                .agent
                .get(url.as_str())
                .call()
                .map_err(|e| BitsError::Remote(format!("S3 LIST: {e}")))?;
            let mut body = Vec::new();
            resp.into_reader()
                .read_to_end(&mut body)
                .map_err(|e| BitsError::Remote(format!("S3 LIST: {e}")))?;

            let body = std::str::from_utf8(&body)
                .map_err(|e| BitsError::Remote(format!("S3 LIST: bad response: {e}")))?;
            let parsed = ListObjectsV2::parse_response(body)
                .map_err(|e| BitsError::Remote(format!("S3 LIST: bad response: {e}")))?;

            for object in &parsed.contents {
                if object.key.len() != KEY_HEX_LEN {
                    continue;
                }
                match ChunkKey::from_hex(&object.key) {
                    Ok(key) => visit(key)?,
                    Err(_) => debug!(object = %object.key, "skipping non-key object"),
                }
            }

            match parsed.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => return Ok(()),
            }
        }
    }
}
