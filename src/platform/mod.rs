pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;

/// One inbound event from the messaging platform.
///
/// Built once per delivery and handed to the dispatcher; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Platform-assigned, monotonically increasing update id
    pub id: i64,
    /// Chat the update originated from, if any
    pub chat_id: Option<i64>,
    /// Sender, if any
    pub user_id: Option<u64>,
    /// Message text; commands and their arguments live here
    pub text: Option<String>,
}

#[cfg(test)]
impl Update {
    pub fn text_message(id: i64, chat_id: i64, text: &str) -> Self {
        Self {
            id,
            chat_id: Some(chat_id),
            user_id: None,
            text: Some(text.to_string()),
        }
    }
}

/// Largest offset `fetch_updates` can pass on; the Bot API takes a 32-bit value.
pub const MAX_UPDATE_OFFSET: i64 = i32::MAX as i64;

/// Outbound operations the relay needs from the messaging platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Point the platform at `url`, discarding updates queued before the call.
    async fn register_webhook(&self, url: &Url, secret_token: Option<&str>) -> Result<()>;

    /// Remove any registered webhook so long polling is accepted.
    async fn remove_webhook(&self) -> Result<()>;

    /// Long-poll for updates with id >= `offset`.
    async fn fetch_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>>;

    /// Send `text` to `chat_id`.
    async fn send_reply(&self, chat_id: i64, text: &str) -> Result<()>;
}

#[cfg(test)]
pub mod testing {
    //! In-memory platform used by dispatcher, ingress and poll loop tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    pub enum Batch {
        Updates(Vec<Update>),
        Fail(&'static str),
    }

    #[derive(Default)]
    pub struct FakePlatform {
        pub batches: Mutex<VecDeque<Batch>>,
        pub offsets: Mutex<Vec<Option<i64>>>,
        pub replies: Mutex<Vec<(i64, String)>>,
        pub webhooks: Mutex<Vec<(String, Option<String>)>>,
        pub removed_webhooks: Mutex<usize>,
        pub fail_replies: bool,
        /// Cancelled once every queued batch has been served.
        pub drained: Option<CancellationToken>,
    }

    impl FakePlatform {
        pub fn with_batches(batches: Vec<Batch>, drained: CancellationToken) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                drained: Some(drained),
                ..Default::default()
            }
        }

        pub fn replies(&self) -> Vec<(i64, String)> {
            self.replies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Platform for FakePlatform {
        async fn register_webhook(&self, url: &Url, secret_token: Option<&str>) -> Result<()> {
            self.webhooks
                .lock()
                .unwrap()
                .push((url.to_string(), secret_token.map(str::to_string)));
            Ok(())
        }

        async fn remove_webhook(&self) -> Result<()> {
            *self.removed_webhooks.lock().unwrap() += 1;
            Ok(())
        }

        async fn fetch_updates(
            &self,
            offset: Option<i64>,
            _timeout: Duration,
        ) -> Result<Vec<Update>> {
            self.offsets.lock().unwrap().push(offset);
            let next = self.batches.lock().unwrap().pop_front();
            match next {
                Some(Batch::Updates(updates)) => Ok(updates),
                Some(Batch::Fail(message)) => anyhow::bail!(message),
                None => {
                    if let Some(token) = &self.drained {
                        token.cancel();
                    }
                    Ok(Vec::new())
                }
            }
        }

        async fn send_reply(&self, chat_id: i64, text: &str) -> Result<()> {
            if self.fail_replies {
                anyhow::bail!("send refused");
            }
            self.replies
                .lock()
                .unwrap()
                .push((chat_id, text.to_string()));
            Ok(())
        }
    }
}
