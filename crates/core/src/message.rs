/// A single inbound prompt, alive only for the request it triggers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub author: String,
    pub conversation: String,
    pub text: String,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
}

impl IncomingMessage {
    pub const LOCAL_AUTHOR: &'static str = "local";
    pub const LOCAL_CONVERSATION: &'static str = "terminal";

    /// A message typed at the interactive prompt.
    pub fn local(text: impl Into<String>) -> Self {
        Self {
            author: Self::LOCAL_AUTHOR.to_owned(),
            conversation: Self::LOCAL_CONVERSATION.to_owned(),
            text: text.into(),
            ts: None,
            thread_ts: None,
        }
    }

    /// Thread a reply should land in: the existing thread, else the message itself.
    pub fn reply_thread(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.ts.as_deref())
    }
}
