use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use rayabaari_client::attachments::Upload;
use rayabaari_client::reactions::{PALETTE, group_reactions};
use rayabaari_client::{
    Applied, ChatError, Login, Message, ReplyPreview, RoomSession, SessionUpdate,
};
use rayabaari_crypto::Codec;
use rayabaari_types::{Backend, MessageId};

const HELP: &str = "\
commands:
  <text>                 send a message
  /reply <id>            reply to a message with the next send
  /edit <id>             replace a message with the next send
  /cancel                drop the pending reply or edit
  /delete <id>           delete a message
  /react <id> <emoji|1-5>
  /attach <path> [text]  send a file
  /older                 load older messages
  /search <text>         search loaded messages
  /next, /prev           move between search matches
  /online                who is here
  /clear                 delete the room history
  /quit";

pub async fn run(backend: Arc<dyn Backend>, codec: Arc<Codec>, login: Login) -> Result<()> {
    let mut session = RoomSession::open(backend, codec, &login.username, &login.room_key).await?;
    println!("Joined {} as {}. /help for commands.", login.room_name, login.username);
    for message in session.store().snapshot().iter() {
        print_message(&session, message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            update = session.next_update() => match update {
                Ok(update) => render(&session, update),
                Err(ChatError::ChannelClosed) => break,
                Err(e) => warn!("Channel error: {}", e),
            },
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match command(&mut session, line.trim_end()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("! {}", e),
                }
            }
        }
    }

    info!("Leaving {}", login.room_name);
    Ok(())
}

/// Run one input line. Returns false to quit.
async fn command(session: &mut RoomSession, line: &str) -> Result<bool> {
    let (cmd, rest) = match line.strip_prefix('/') {
        Some(cmd) => cmd.split_once(' ').unwrap_or((cmd, "")),
        None => {
            session.submit(line, None).await?;
            return Ok(true);
        }
    };
    let rest = rest.trim();

    match cmd {
        "quit" | "exit" => return Ok(false),
        "help" => println!("{}", HELP),
        "reply" => session.start_reply(&MessageId::from(rest))?,
        "edit" => session.start_edit(&MessageId::from(rest))?,
        "cancel" => session.composer_mut().cancel(),
        "delete" => session.delete_message(&MessageId::from(rest)).await?,
        "react" => {
            let (id, emoji) = rest.split_once(' ').unwrap_or((rest, "1"));
            let emoji = pick_emoji(emoji.trim());
            let toggle = session.toggle_reaction(&MessageId::from(id), emoji).await?;
            println!("{:?} {} on #{}", toggle, emoji, id);
        }
        "attach" => {
            let (path, caption) = rest.split_once(' ').unwrap_or((rest, ""));
            let upload = read_upload(Path::new(path)).await?;
            session.submit(caption, Some(upload)).await?;
        }
        "older" => {
            let outcome = session.load_older().await?;
            println!("{:?}", outcome);
            for message in session.store().snapshot().iter() {
                print_message(session, message);
            }
        }
        "search" => {
            session.set_search_query(rest);
            print_match(session);
        }
        "next" => {
            session.search_mut().next();
            print_match(session);
        }
        "prev" => {
            session.search_mut().previous();
            print_match(session);
        }
        "online" => println!("online: {}", session.presence().names().join(", ")),
        "clear" => {
            let removed = session.clear_history().await?;
            println!("cleared {} messages", removed);
        }
        other => println!("unknown command /{}", other),
    }
    Ok(true)
}

/// A palette position (1-5) or a literal emoji.
fn pick_emoji(choice: &str) -> &str {
    choice
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| PALETTE.get(i).copied())
        .unwrap_or(choice)
}

async fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    Ok(Upload::new(name, mime.essence_str(), bytes))
}

fn render(session: &RoomSession, update: SessionUpdate) {
    match update {
        SessionUpdate::Live => println!("* connected"),
        SessionUpdate::Presence { online } => println!("* {} online", online),
        SessionUpdate::Messages(Applied::Inserted(id) | Applied::Updated(id) | Applied::Reacted(id)) => {
            if let Some(message) = session.store().get(&id) {
                print_message(session, &message);
            }
        }
        SessionUpdate::Messages(Applied::Removed(id)) => println!("* #{} deleted", id),
        SessionUpdate::Messages(Applied::Ignored) => {}
    }
}

fn print_match(session: &RoomSession) {
    let search = session.search();
    print!("[{}] ", search.status());
    match search.current().and_then(|id| session.store().get(id)) {
        Some(message) => print_message(session, &message),
        None => println!("no matches"),
    }
}

fn print_message(session: &RoomSession, message: &Message) {
    if let Some(preview) = session.store().reply_preview(message) {
        match preview {
            ReplyPreview::Quote { author, text } => println!("    > {}: {}", author, text),
            ReplyPreview::Deleted => println!("    > message deleted"),
        }
    }

    let mut line = format!(
        "{} #{} {}: {}",
        message.created_at.with_timezone(&Local).format("%H:%M"),
        message.id,
        message.author,
        message.content
    );
    if let Some(attachment) = &message.attachment {
        line.push_str(&format!(" [{}: {}]", attachment.kind.as_str(), attachment.url));
    }
    if message.edited {
        line.push_str(" (edited)");
    }
    let reactions: Vec<String> = group_reactions(&message.reactions)
        .into_iter()
        .map(|g| format!("{} {}", g.emoji, g.count))
        .collect();
    if !reactions.is_empty() {
        line.push_str(&format!("  {}", reactions.join(" ")));
    }
    println!("{}", line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_by_position_or_literal() {
        assert_eq!(pick_emoji("1"), "👍");
        assert_eq!(pick_emoji("5"), "😢");
        assert_eq!(pick_emoji("0"), "0");
        assert_eq!(pick_emoji("9"), "9");
        assert_eq!(pick_emoji("🔥"), "🔥");
    }
}
