use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::datastore::write_atomic;
use crate::error::BoardError;
use crate::store::IdentityProvider;
use crate::task::User;

/// Identity provider that remembers the signed-in user in `session.data`.
/// An empty file means nobody is signed in.
#[derive(Debug)]
pub struct SessionIdentity {
    pub session_path: PathBuf,
}

impl SessionIdentity {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let session_path = data_dir.join("session.data");
        if !session_path.exists() {
            fs::write(&session_path, "")
                .with_context(|| format!("failed to create {}", session_path.display()))?;
        }
        Ok(Self { session_path })
    }

    #[tracing::instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn sign_in(&self, user: &User) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(user)?;
        write_atomic(&self.session_path, &payload)
            .with_context(|| format!("failed writing {}", self.session_path.display()))?;
        info!("signed in");
        Ok(())
    }

    fn read(&self) -> anyhow::Result<Option<User>> {
        let raw = fs::read_to_string(&self.session_path)
            .with_context(|| format!("failed reading {}", self.session_path.display()))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let user = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {}", self.session_path.display()))?;
        Ok(Some(user))
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentity {
    async fn current_user(&self) -> Result<Option<User>, BoardError> {
        let user = self
            .read()
            .map_err(|err| BoardError::Store(format!("{err:#}")))?;
        debug!(signed_in = user.is_some(), "resolved session");
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), BoardError> {
        fs::write(&self.session_path, "").map_err(|err| {
            BoardError::Store(format!(
                "failed writing {}: {err}",
                self.session_path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::UserId;

    #[tokio::test]
    async fn sign_in_and_out() {
        let dir = tempfile::tempdir().unwrap();
        let identity = SessionIdentity::open(dir.path()).unwrap();
        assert_eq!(identity.current_user().await.unwrap(), None);

        let user = User {
            id: UserId::from("u1"),
            email: Some("ana@example.com".to_string()),
        };
        identity.sign_in(&user).unwrap();
        let reopened = SessionIdentity::open(dir.path()).unwrap();
        assert_eq!(reopened.current_user().await.unwrap(), Some(user));

        reopened.sign_out().await.unwrap();
        assert_eq!(identity.current_user().await.unwrap(), None);
    }
}
