use chrono::Local;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{registry, AppError, AppResult};

/// Reserved destination meaning "visible to all participants". Names
/// equal to the token are refused at registration, so it can never be
/// claimed by a real participant.
pub const BROADCAST_TOKEN: &str = "everyone";

pub const JOIN_NOTICE: &str = "joined the chat";
pub const LEAVE_NOTICE: &str = "left the chat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Broadcast,
    Direct(String),
}

impl Recipient {
    pub fn from_token(token: &str) -> Self {
        if token == BROADCAST_TOKEN {
            Self::Broadcast
        } else {
            Self::Direct(token.to_owned())
        }
    }

    pub fn as_token(&self) -> &str {
        match self {
            Self::Broadcast => BROADCAST_TOKEN,
            Self::Direct(name) => name,
        }
    }
}

impl Serialize for Recipient {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_token())
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_token(&String::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "private-message")]
    PrivateMessage,
    #[serde(rename = "status")]
    Status,
}

impl MessageKind {
    fn as_token(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::PrivateMessage => "private-message",
            Self::Status => "status",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "message" => Some(Self::Message),
            "private-message" => Some(Self::PrivateMessage),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: Recipient,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub time: String,
}

type MessageRow = (String, String, String, String, String, String);

fn from_row((id, sender, recipient, text, kind, time): MessageRow) -> Result<Message, sqlx::Error> {
    let kind = MessageKind::from_token(&kind)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown message kind {kind:?}").into()))?;

    Ok(Message {
        id,
        from: sender,
        to: Recipient::from_token(&recipient),
        text,
        kind,
        time,
    })
}

fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Appends at the end of the log. `id` and `time` are assigned here,
/// never by the caller.
pub async fn append(
    db_pool: &SqlitePool,
    from: &str,
    to: &Recipient,
    text: &str,
    kind: MessageKind,
) -> AppResult<String> {
    let id = Uuid::now_v7().to_string();
    sqlx::query("INSERT INTO messages (id,sender,recipient,text,kind,time) VALUES (?,?,?,?,?,?)")
        .bind(&id)
        .bind(from)
        .bind(to.as_token())
        .bind(text)
        .bind(kind.as_token())
        .bind(clock_time())
        .execute(db_pool)
        .await?;

    Ok(id)
}

/// The whole log in append order.
pub async fn scan(db_pool: &SqlitePool) -> AppResult<Vec<Message>> {
    let rows: Vec<MessageRow> =
        sqlx::query_as("SELECT id,sender,recipient,text,kind,time FROM messages ORDER BY seq")
            .fetch_all(db_pool)
            .await?;

    rows.into_iter()
        .map(|row| from_row(row).map_err(AppError::from))
        .collect()
}

pub async fn get(db_pool: &SqlitePool, id: &str) -> AppResult<Message> {
    let row: Option<MessageRow> =
        sqlx::query_as("SELECT id,sender,recipient,text,kind,time FROM messages WHERE id=?")
            .bind(id)
            .fetch_optional(db_pool)
            .await?;

    let Some(row) = row else {
        return Err(AppError::NotFound);
    };

    Ok(from_row(row)?)
}

/// Replaces `to`/`text`/`type` and refreshes `time`. `seq` is untouched,
/// so the message keeps its original position in the log.
pub async fn update(
    db_pool: &SqlitePool,
    id: &str,
    requester: &str,
    to: &Recipient,
    text: &str,
    kind: MessageKind,
) -> AppResult<()> {
    validate(to, text, kind)?;

    let result =
        sqlx::query("UPDATE messages SET recipient=?, text=?, kind=?, time=? WHERE id=? AND sender=?")
            .bind(to.as_token())
            .bind(text)
            .bind(kind.as_token())
            .bind(clock_time())
            .bind(id)
            .bind(requester)
            .execute(db_pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(ownership_miss(db_pool, id).await);
    }

    Ok(())
}

pub async fn delete(db_pool: &SqlitePool, id: &str, requester: &str) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM messages WHERE id=? AND sender=?")
        .bind(id)
        .bind(requester)
        .execute(db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ownership_miss(db_pool, id).await);
    }

    Ok(())
}

// The guarded write missed: either the id is gone, or the row belongs to
// somebody else.
async fn ownership_miss(db_pool: &SqlitePool, id: &str) -> AppError {
    let probe = sqlx::query_as::<_, (i64,)>("SELECT 1 FROM messages WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await;

    match probe {
        Ok(Some(_)) => AppError::Forbidden,
        Ok(None) => AppError::NotFound,
        Err(err) => err.into(),
    }
}

/// A post from a participant. Field validation happens before the store
/// is touched; a sender that is not currently registered is refused.
pub async fn post_message(
    db_pool: &SqlitePool,
    from: &str,
    to: &Recipient,
    text: &str,
    kind: MessageKind,
) -> AppResult<String> {
    validate(to, text, kind)?;

    if !registry::is_active(db_pool, from).await? {
        return Err(AppError::Unauthorized);
    }

    append(db_pool, from, to, text, kind).await
}

fn validate(to: &Recipient, text: &str, kind: MessageKind) -> AppResult<()> {
    if kind == MessageKind::Status {
        return Err(AppError::invalid("type must be message or private-message"));
    }
    if text.trim().is_empty() {
        return Err(AppError::invalid("text must not be empty"));
    }
    if let Recipient::Direct(name) = to {
        if name.trim().is_empty() {
            return Err(AppError::invalid("to must not be empty"));
        }
    }

    Ok(())
}

pub fn is_visible_to(message: &Message, requester: &str) -> bool {
    message.from == requester
        || match &message.to {
            Recipient::Broadcast => true,
            Recipient::Direct(name) => name == requester,
        }
}

/// Projects the log for one reader. With a limit, the window is the last
/// `N` entries of the *unfiltered* log and visibility applies inside that
/// window — "last 3" means the visible part of the three newest messages
/// in the room, not the reader's three newest.
pub fn visible_to(log: &[Message], requester: &str, limit: Option<usize>) -> Vec<Message> {
    let window = match limit {
        Some(n) => &log[log.len().saturating_sub(n)..],
        None => log,
    };

    window
        .iter()
        .filter(|message| is_visible_to(message, requester))
        .cloned()
        .collect()
}
