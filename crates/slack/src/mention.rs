/// Who the bot is on Slack, resolved once at startup through `auth.test`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub bot_id: Option<String>,
}

impl BotIdentity {
    pub fn new(user_id: impl Into<String>, bot_id: Option<String>) -> Self {
        Self { user_id: user_id.into(), bot_id }
    }

    /// `<@U123>`, the token Slack inserts when someone mentions the bot.
    pub fn mention_token(&self) -> String {
        format!("<@{}>", self.user_id)
    }

    pub fn is_mentioned_in(&self, text: &str) -> bool {
        text.contains(&self.mention_token()) || text.contains(&self.labelled_prefix())
    }

    pub fn authored(&self, user_id: Option<&str>, bot_id: Option<&str>) -> bool {
        user_id == Some(self.user_id.as_str())
            || matches!((bot_id, self.bot_id.as_deref()), (Some(theirs), Some(ours)) if theirs == ours)
    }

    /// Removes every mention of the bot, both `<@U123>` and `<@U123|name>`,
    /// then trims the remainder.
    pub fn strip_mention(&self, text: &str) -> String {
        let plain = self.mention_token();
        let labelled = self.labelled_prefix();
        let mut remaining = text;
        let mut output = String::with_capacity(text.len());

        loop {
            let next_plain = remaining.find(&plain).map(|at| (at, plain.len()));
            let next_labelled = remaining.find(&labelled).and_then(|at| {
                remaining[at..].find('>').map(|close| (at, close + 1))
            });

            let next = match (next_plain, next_labelled) {
                (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
                (a, b) => a.or(b),
            };

            let Some((at, len)) = next else {
                output.push_str(remaining);
                break;
            };
            output.push_str(&remaining[..at]);
            remaining = &remaining[at + len..];
        }

        output.trim().to_owned()
    }

    fn labelled_prefix(&self) -> String {
        format!("<@{}|", self.user_id)
    }
}
