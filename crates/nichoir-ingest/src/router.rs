//! Topic-based dispatch of inbound broker messages.
//!
//! Telemetry payloads update the `TelemetryCache`; image payloads are
//! persisted and recorded together with the cached reading. Every failure is
//! contained to the message that caused it and reported in the returned
//! `DispatchOutcome`.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use nichoir_core::error::NichoirError;
use nichoir_core::types::RecordId;
use nichoir_storage::RecordStore;

use crate::persist::ImagePersister;
use crate::telemetry::TelemetryCache;

/// Bytes of an unrouted payload shown in the log line.
const PREVIEW_LEN: usize = 30;

/// What a single `dispatch` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A reading was parsed and cached.
    TelemetryUpdated { value: f64 },
    /// The telemetry payload was not a number; the cache is unchanged.
    TelemetryRejected { reason: String },
    /// The image was written and recorded.
    ImageStored {
        id: RecordId,
        path: PathBuf,
        telemetry_level: Option<f64>,
    },
    /// The image could not be written; no record was created.
    ImageNotPersisted { reason: String },
    /// The image file exists but the record insert failed.
    ImageNotRecorded { path: PathBuf, reason: String },
    /// The topic is neither the image nor the telemetry topic.
    Ignored,
}

/// Routes `(topic, payload)` pairs to the telemetry or image handler.
pub struct TopicRouter {
    image_topic: String,
    telemetry_topic: String,
    default_comment: Option<String>,
    cache: TelemetryCache,
    persister: ImagePersister,
    store: Arc<dyn RecordStore>,
}

impl TopicRouter {
    pub fn new(
        image_topic: impl Into<String>,
        telemetry_topic: impl Into<String>,
        persister: ImagePersister,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            image_topic: image_topic.into(),
            telemetry_topic: telemetry_topic.into(),
            default_comment: None,
            cache: TelemetryCache::new(),
            persister,
            store,
        }
    }

    /// Comment attached to every image record.
    pub fn with_default_comment(mut self, comment: Option<String>) -> Self {
        self.default_comment = comment;
        self
    }

    pub fn image_topic(&self) -> &str {
        &self.image_topic
    }

    pub fn telemetry_topic(&self) -> &str {
        &self.telemetry_topic
    }

    /// Topics the broker link must subscribe to.
    pub fn topics(&self) -> [&str; 2] {
        [self.image_topic.as_str(), self.telemetry_topic.as_str()]
    }

    pub fn cache(&self) -> &TelemetryCache {
        &self.cache
    }

    /// Handle one inbound message to completion.
    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        if topic == self.telemetry_topic {
            self.handle_telemetry(topic, payload)
        } else if topic == self.image_topic {
            self.handle_image(payload)
        } else {
            let preview = &payload[..payload.len().min(PREVIEW_LEN)];
            info!(
                topic,
                bytes = payload.len(),
                preview = %String::from_utf8_lossy(preview),
                "Message on unrouted topic"
            );
            DispatchOutcome::Ignored
        }
    }

    fn handle_telemetry(&mut self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        match parse_reading(payload) {
            Ok(value) => {
                self.cache.set(topic, value);
                debug!(topic, value, "Telemetry reading cached");
                DispatchOutcome::TelemetryUpdated { value }
            }
            Err(e) => {
                warn!(topic, error = %e, "Discarding telemetry payload");
                DispatchOutcome::TelemetryRejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn handle_image(&mut self, payload: &[u8]) -> DispatchOutcome {
        let path = match self.persister.save(payload) {
            Ok(path) => path,
            Err(e) => {
                warn!(bytes = payload.len(), error = %e, "Image not saved, no record created");
                return DispatchOutcome::ImageNotPersisted {
                    reason: e.to_string(),
                };
            }
        };

        // A lossy path would point the record at a file that does not exist.
        let Some(file_path) = path.to_str() else {
            warn!(path = %path.display(), "Image path is not valid UTF-8, no record created");
            return DispatchOutcome::ImageNotRecorded {
                reason: format!("path is not valid UTF-8: {}", path.display()),
                path,
            };
        };
        let telemetry_level = self.cache.get(&self.telemetry_topic);

        match self
            .store
            .insert(file_path, telemetry_level, self.default_comment.as_deref())
        {
            Ok(id) => {
                info!(
                    id,
                    path = %file_path,
                    bytes = payload.len(),
                    telemetry_level = ?telemetry_level,
                    "Image received"
                );
                DispatchOutcome::ImageStored {
                    id,
                    path,
                    telemetry_level,
                }
            }
            Err(e) => {
                warn!(path = %file_path, error = %e, "Image saved but record insert failed");
                DispatchOutcome::ImageNotRecorded {
                    path,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Parse a UTF-8 decimal telemetry payload.
pub fn parse_reading(payload: &[u8]) -> Result<f64, NichoirError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| NichoirError::Parse(format!("payload is not UTF-8: {}", e)))?;
    let trimmed = text.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| NichoirError::Parse(format!("not a number: '{}'", trimmed)))?;
    if !value.is_finite() {
        return Err(NichoirError::Parse(format!("not a finite number: '{}'", trimmed)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nichoir_core::types::RecordRef;
    use nichoir_storage::{Database, ImageRepository};
    use rand::Rng;

    const IMAGE: &str = "nichoir/image";
    const BATTERY: &str = "nichoir/battery";

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: ImageRepository,
        router: TopicRouter,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo = ImageRepository::new(Arc::new(Database::in_memory().unwrap()));
        let router = TopicRouter::new(
            IMAGE,
            BATTERY,
            ImagePersister::new(dir.path().join("images"), "jpg"),
            Arc::new(repo.clone()),
        )
        .with_default_comment(Some("Image auto".to_string()));
        Fixture {
            _dir: dir,
            repo,
            router,
        }
    }

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading(b"3.7").unwrap(), 3.7);
        assert_eq!(parse_reading(b" 42\n").unwrap(), 42.0);
        assert_eq!(parse_reading(b"-0.5").unwrap(), -0.5);
        assert!(matches!(parse_reading(b"not-a-number"), Err(NichoirError::Parse(_))));
        assert!(parse_reading(b"").is_err());
        assert!(parse_reading(b"NaN").is_err());
        assert!(parse_reading(b"inf").is_err());
        assert!(parse_reading(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_telemetry_then_image_correlates() {
        let mut fx = fixture();

        let mut payload = vec![0u8; 1024];
        rand::rng().fill(&mut payload[..]);

        assert_eq!(
            fx.router.dispatch(BATTERY, b"3.7"),
            DispatchOutcome::TelemetryUpdated { value: 3.7 }
        );

        let (id, path) = match fx.router.dispatch(IMAGE, &payload) {
            DispatchOutcome::ImageStored {
                id,
                path,
                telemetry_level,
            } => {
                assert_eq!(telemetry_level, Some(3.7));
                (id, path)
            }
            other => panic!("unexpected outcome: {:?}", other),
        };

        let record = fx.repo.find_by_id(id).unwrap().unwrap();
        assert_eq!(record.telemetry_level, Some(3.7));
        assert_eq!(record.comment.as_deref(), Some("Image auto"));
        assert_eq!(record.file_path, path.to_string_lossy());
        assert_eq!(std::fs::read(&path).unwrap(), payload);
    }

    #[test]
    fn test_image_without_telemetry_has_null_level() {
        let mut fx = fixture();

        let outcome = fx.router.dispatch(IMAGE, b"\xff\xd8\xff\xe0jpeg");
        let id = match outcome {
            DispatchOutcome::ImageStored { id, .. } => id,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert!(fx.repo.find_by_id(id).unwrap().unwrap().telemetry_level.is_none());
    }

    #[test]
    fn test_bad_telemetry_keeps_previous_value() {
        let mut fx = fixture();

        fx.router.dispatch(BATTERY, b"3.9");
        let outcome = fx.router.dispatch(BATTERY, b"not-a-number");

        assert!(matches!(outcome, DispatchOutcome::TelemetryRejected { .. }));
        assert_eq!(fx.router.cache().get(BATTERY), Some(3.9));
        assert_eq!(fx.repo.count().unwrap(), 0);
    }

    #[test]
    fn test_bad_telemetry_on_empty_cache_stays_unknown() {
        let mut fx = fixture();
        fx.router.dispatch(BATTERY, b"abc");
        assert_eq!(fx.router.cache().get(BATTERY), None);
    }

    #[test]
    fn test_cache_holds_last_successful_reading() {
        let mut fx = fixture();
        let payloads: [&[u8]; 5] = [b"4.1", b"4.0", b"oops", b"3.95", b""];
        for payload in payloads {
            fx.router.dispatch(BATTERY, payload);
        }
        assert_eq!(fx.router.cache().get(BATTERY), Some(3.95));
    }

    #[test]
    fn test_unrouted_topic_changes_nothing() {
        let mut fx = fixture();
        assert_eq!(
            fx.router.dispatch("nichoir/debug", b"hello"),
            DispatchOutcome::Ignored
        );
        assert_eq!(fx.router.cache().get("nichoir/debug"), None);
        assert_eq!(fx.repo.count().unwrap(), 0);
    }

    #[test]
    fn test_persist_failure_creates_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let repo = ImageRepository::new(Arc::new(Database::in_memory().unwrap()));
        let mut router = TopicRouter::new(
            IMAGE,
            BATTERY,
            ImagePersister::new(blocker.join("images"), "jpg"),
            Arc::new(repo.clone()),
        );

        let outcome = router.dispatch(IMAGE, b"bytes");
        assert!(matches!(outcome, DispatchOutcome::ImageNotPersisted { .. }));
        assert_eq!(repo.count().unwrap(), 0);
    }

    struct FailingStore;

    impl RecordStore for FailingStore {
        fn insert(&self, _: &str, _: Option<f64>, _: Option<&str>) -> Result<RecordId, NichoirError> {
            Err(NichoirError::Store("database is locked".into()))
        }

        fn list_all(&self) -> Result<Vec<RecordRef>, NichoirError> {
            Ok(Vec::new())
        }

        fn delete_by_id(&self, _: RecordId) -> Result<bool, NichoirError> {
            Ok(false)
        }
    }

    #[test]
    fn test_insert_failure_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let mut router = TopicRouter::new(
            IMAGE,
            BATTERY,
            ImagePersister::new(dir.path(), "jpg"),
            Arc::new(FailingStore),
        );

        match router.dispatch(IMAGE, b"bytes") {
            DispatchOutcome::ImageNotRecorded { path, reason } => {
                assert!(path.exists());
                assert!(reason.contains("locked"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // The router keeps working after a failed insert.
        assert_eq!(
            router.dispatch(BATTERY, b"3.3"),
            DispatchOutcome::TelemetryUpdated { value: 3.3 }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_image_dir_creates_no_record() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let image_dir = dir.path().join(OsStr::from_bytes(b"images-\xff"));

        let repo = ImageRepository::new(Arc::new(Database::in_memory().unwrap()));
        let mut router = TopicRouter::new(
            IMAGE,
            BATTERY,
            ImagePersister::new(image_dir, "jpg"),
            Arc::new(repo.clone()),
        );

        match router.dispatch(IMAGE, b"bytes") {
            DispatchOutcome::ImageNotRecorded { path, reason } => {
                assert!(path.exists());
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_topics() {
        let fx = fixture();
        assert_eq!(fx.router.topics(), [IMAGE, BATTERY]);
        assert_eq!(fx.router.image_topic(), IMAGE);
        assert_eq!(fx.router.telemetry_topic(), BATTERY);
    }
}
