use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CommandHandler, HandlerError, HandlerResult};
use crate::redis::{Command, Reply};

/// AUTH handler backed by a set of accepted tokens.
pub struct TokenAuth {
    tokens: RwLock<HashSet<String>>,
}

impl TokenAuth {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: RwLock::new(tokens.into_iter().map(Into::into).collect()),
        }
    }

    pub async fn is_valid(&self, token: &str) -> bool {
        self.tokens.read().await.contains(token)
    }
}

#[async_trait]
impl CommandHandler for TokenAuth {
    async fn handle(&self, command: &Command) -> HandlerResult {
        // A missing token argument compares as the empty string.
        let token = command.get_str(1);
        if self.is_valid(&token).await {
            Ok(Reply::Ok)
        } else {
            tracing::debug!("rejected AUTH token");
            Err(HandlerError::InvalidCredential)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_only_known_tokens() {
        let auth = TokenAuth::new(["secretpass1"]);

        let ok = auth
            .handle(&Command::from_args(["AUTH", "secretpass1"]))
            .await
            .unwrap();
        assert_eq!(ok, Reply::Ok);

        let err = auth
            .handle(&Command::from_args(["AUTH", "hunter"]))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidCredential));

        let err = auth.handle(&Command::from_args(["AUTH"])).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidCredential));
    }

    #[tokio::test]
    async fn empty_token_set_rejects_everything() {
        let auth = TokenAuth::new(Vec::<String>::new());
        assert!(!auth.is_valid("").await);

        let err = auth
            .handle(&Command::from_args(["AUTH", ""]))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidCredential));
    }
}
