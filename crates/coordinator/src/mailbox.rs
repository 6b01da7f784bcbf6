use std::collections::HashMap;

use chrono::{DateTime, Utc};
use orchestrator_core::{Message, MessageType};

/// 每个Agent一个收件箱，按优先级降序排列，同优先级保持到达顺序
#[derive(Debug, Default)]
pub struct Mailboxes {
    boxes: HashMap<String, Vec<Message>>,
}

impl Mailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&mut self, message: Message) {
        let mailbox = self.boxes.entry(message.recipient_id.clone()).or_default();
        let position = mailbox.partition_point(|m| m.priority >= message.priority);
        mailbox.insert(position, message);
    }

    /// 取出最多 `limit` 条未过期的消息，过期消息同时被丢弃，不匹配类型的消息保留
    pub fn take(
        &mut self,
        agent_id: &str,
        limit: usize,
        message_type: Option<MessageType>,
        now: DateTime<Utc>,
    ) -> Vec<Message> {
        let Some(mailbox) = self.boxes.get_mut(agent_id) else {
            return Vec::new();
        };
        mailbox.retain(|m| !m.is_expired(now));

        let mut taken = Vec::new();
        let mut kept = Vec::with_capacity(mailbox.len());
        for message in mailbox.drain(..) {
            let wanted = message_type.map_or(true, |t| t == message.message_type);
            if wanted && taken.len() < limit {
                taken.push(message);
            } else {
                kept.push(message);
            }
        }
        *mailbox = kept;
        taken
    }

    pub fn remove(&mut self, agent_id: &str) -> usize {
        self.boxes.remove(agent_id).map_or(0, |m| m.len())
    }

    pub fn len(&self, agent_id: &str) -> usize {
        self.boxes.get(agent_id).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.boxes.values().map(Vec::len).sum()
    }
}
