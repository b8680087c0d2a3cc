//! Single-use download tokens.
//!
//! A token is the truncated HMAC of `"<jobId>|<expiresAtMillis>"`. Only the
//! expiry is stored on the job, so installing a new expiry revokes every
//! token issued before it.

use chrono::{DateTime, Duration, TimeZone, Utc};
use domain::models::{ExportJob, ExportStatus};
use domain::ExportError;
use shared::crypto::{random_secret, sign_truncated, verify_truncated};
use uuid::Uuid;

const GENERATED_SECRET_LEN: usize = 32;

/// Issues and checks download tokens for export jobs.
#[derive(Clone)]
pub struct DownloadTokenManager {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for DownloadTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTokenManager")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl DownloadTokenManager {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Uses `configured` or, when it is empty, a random per-process secret.
    pub fn from_config(configured: &str, ttl_secs: i64) -> Self {
        if configured.is_empty() {
            tracing::warn!(
                "exports.token_secret is not set; download links will not survive a restart"
            );
            Self::new(random_secret(GENERATED_SECRET_LEN), ttl_secs)
        } else {
            Self::new(configured.as_bytes().to_vec(), ttl_secs)
        }
    }

    /// Expiry for a token issued at `now`, truncated to whole milliseconds.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        truncate_to_millis(now + self.ttl)
    }

    pub fn sign(&self, job_id: Uuid, expires_at: DateTime<Utc>) -> Result<String, ExportError> {
        sign_truncated(&self.secret, &token_message(job_id, expires_at))
            .map_err(|e| ExportError::Store(e.to_string()))
    }

    /// Ordered download checks against a job read under the store's lock.
    ///
    /// Forbidden when the token does not match the stored expiry, gone when
    /// that expiry passed or the token was used, not ready when there is
    /// nothing to serve.
    pub fn check_download(
        &self,
        job: &ExportJob,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ExportError> {
        let Some(expires_at) = job.download_token_expires_at else {
            return Err(ExportError::TokenForbidden);
        };

        if !verify_truncated(&self.secret, &token_message(job.id, expires_at), token) {
            return Err(ExportError::TokenForbidden);
        }

        if expires_at <= now || job.download_token_consumed_at.is_some() {
            return Err(ExportError::TokenGone);
        }

        let ready = job.status == ExportStatus::Completed
            && job.payload.is_some()
            && job.filename.is_some()
            && job.content_type.is_some();
        if !ready {
            return Err(ExportError::NotReady(format!(
                "Export job is {}",
                job.status
            )));
        }

        Ok(())
    }
}

fn token_message(job_id: Uuid, expires_at: DateTime<Utc>) -> String {
    format!("{}|{}", job_id, expires_at.timestamp_millis())
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(at.timestamp_millis())
        .single()
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{CompletedExport, ExportFormat, ExportParameters, GoalExportParams};

    fn manager() -> DownloadTokenManager {
        DownloadTokenManager::new(b"unit-test-secret".to_vec(), 600)
    }

    fn completed_job(m: &DownloadTokenManager, now: DateTime<Utc>) -> ExportJob {
        let mut job = ExportJob::queued(
            Uuid::new_v4(),
            ExportFormat::Csv,
            ExportParameters::Goals(GoalExportParams::default()),
            m.expiry_from(now),
            now,
        );
        job.start(now);
        job.complete(
            CompletedExport {
                filename: "goals_20240301000000.csv".into(),
                content_type: "text/csv; charset=utf-8".into(),
                payload: b"id\n".to_vec(),
            },
            now,
        );
        job
    }

    #[test]
    fn test_expiry_is_millisecond_precise() {
        let m = manager();
        let now = Utc::now();
        let expiry = m.expiry_from(now);

        assert_eq!(expiry.timestamp_subsec_nanos() % 1_000_000, 0);
        assert!(expiry > now + Duration::seconds(599));
    }

    #[test]
    fn test_valid_token_passes() {
        let m = manager();
        let now = Utc::now();
        let job = completed_job(&m, now);
        let token = m.sign(job.id, job.download_token_expires_at.unwrap()).unwrap();

        assert_eq!(token.len(), 32);
        assert!(m.check_download(&job, &token, now).is_ok());
    }

    #[test]
    fn test_wrong_token_forbidden() {
        let m = manager();
        let now = Utc::now();
        let job = completed_job(&m, now);

        assert_eq!(
            m.check_download(&job, "00000000000000000000000000000000", now),
            Err(ExportError::TokenForbidden)
        );

        let other = DownloadTokenManager::new(b"another-secret".to_vec(), 600);
        let foreign = other
            .sign(job.id, job.download_token_expires_at.unwrap())
            .unwrap();
        assert_eq!(
            m.check_download(&job, &foreign, now),
            Err(ExportError::TokenForbidden)
        );
    }

    #[test]
    fn test_expired_or_consumed_is_gone() {
        let m = manager();
        let now = Utc::now();
        let mut job = completed_job(&m, now);
        let token = m.sign(job.id, job.download_token_expires_at.unwrap()).unwrap();

        let later = now + Duration::seconds(601);
        assert_eq!(
            m.check_download(&job, &token, later),
            Err(ExportError::TokenGone)
        );

        job.download_token_consumed_at = Some(now);
        assert_eq!(
            m.check_download(&job, &token, now),
            Err(ExportError::TokenGone)
        );
    }

    #[test]
    fn test_queued_job_not_ready() {
        let m = manager();
        let now = Utc::now();
        let job = ExportJob::queued(
            Uuid::new_v4(),
            ExportFormat::Json,
            ExportParameters::Goals(GoalExportParams::default()),
            m.expiry_from(now),
            now,
        );
        let token = m.sign(job.id, job.download_token_expires_at.unwrap()).unwrap();

        assert!(matches!(
            m.check_download(&job, &token, now),
            Err(ExportError::NotReady(_))
        ));
    }

    #[test]
    fn test_new_expiry_invalidates_old_token() {
        let m = manager();
        let now = Utc::now();
        let mut job = completed_job(&m, now);
        let old = m.sign(job.id, job.download_token_expires_at.unwrap()).unwrap();

        let refreshed = m.expiry_from(now + Duration::seconds(5));
        job.reissue_token(refreshed);
        let new = m.sign(job.id, refreshed).unwrap();

        assert_ne!(old, new);
        assert_eq!(
            m.check_download(&job, &old, now),
            Err(ExportError::TokenForbidden)
        );
        assert!(m.check_download(&job, &new, now).is_ok());
    }
}
