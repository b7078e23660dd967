//! Production collaborator implementations: filesystem contract renderer
//! and a log-only mailer.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Datelike;
use tracing::info;

use covercrm_sales::{ContractRenderer, MailError, Mailer, Policy, RenderError};

/// Renders contract documents as files under a configured directory.
///
/// The file name is the policy number, so re-rendering the same policy
/// overwrites rather than accumulates. The durable idempotency marker is
/// still `contract_path` on the policy row, not the file's existence.
pub struct FilesystemContractRenderer {
    base_dir: PathBuf,
}

impl FilesystemContractRenderer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn render_body(policy: &Policy) -> String {
        format!(
            "INSURANCE CONTRACT {number}\n\
             =========================\n\n\
             Policy number: {number}\n\
             Term:          {start} to {end}\n\
             Renewal due:   {renewal}\n\
             Signed:        {signed}\n",
            number = policy.policy_number,
            start = policy.start_date,
            end = policy.end_date,
            renewal = policy.renewal_date,
            signed = policy.signed_at.to_rfc3339(),
        )
    }
}

#[async_trait]
impl ContractRenderer for FilesystemContractRenderer {
    async fn render_contract(&self, policy: &Policy) -> Result<String, RenderError> {
        let dir = self.base_dir.join(policy.start_date.year().to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RenderError(format!("create {}: {e}", dir.display())))?;

        let path = dir.join(format!("{}.pdf", policy.policy_number));
        tokio::fs::write(&path, Self::render_body(policy))
            .await
            .map_err(|e| RenderError(format!("write {}: {e}", path.display())))?;

        info!(policy_number = %policy.policy_number, path = %path.display(), "contract written");
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Mailer that logs instead of sending. Stands in until an SMTP relay is
/// wired up; deployments that need real delivery swap the implementation.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailError> {
        info!(to = %to, subject = %subject, "outbound mail");
        Ok(())
    }
}
