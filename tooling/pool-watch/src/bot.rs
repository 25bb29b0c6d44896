use crate::{
    alerter::render_html,
    commands::{CommandHandler, Invocation},
};
use std::{collections::BTreeSet, sync::Arc, time::SystemTime};
use teloxide::{
    dispatching::UpdateFilterExt,
    dptree,
    payloads::SendMessageSetters,
    prelude::{Dispatcher, Requester, ResponseResult},
    types::{Message, ParseMode, Update, User},
    Bot,
};
use tracing::{debug, warn};

/// Privileged Telegram user ids.
#[derive(Debug, Clone, Default)]
pub struct Admins(pub BTreeSet<u64>);

/// `@username` when the user has one, otherwise the numeric id.
pub fn subscriber_id(user: &User) -> String {
    match &user.username {
        Some(username) => format!("@{username}"),
        None => user.id.0.to_string(),
    }
}

async fn on_message(bot: Bot, message: Message, handler: Arc<CommandHandler>, admins: Admins) -> ResponseResult<()> {
    let (Some(text), Some(user)) = (message.text(), message.from.as_ref()) else {
        return Ok(());
    };

    let invocation = Invocation {
        sender: subscriber_id(user),
        channel: message.chat.id.0.to_string(),
        privileged: admins.0.contains(&user.id.0),
    };

    let Some(reply) = handler.handle(text, &invocation, SystemTime::now()).await else {
        debug!(sender = %invocation.sender, "message ignored");
        return Ok(());
    };

    if let Err(error) = bot
        .send_message(message.chat.id, render_html(&reply, &[]))
        .parse_mode(ParseMode::Html)
        .await
    {
        warn!(error = %error, chat = message.chat.id.0, "failed to send command reply");
    }
    Ok(())
}

/// Serves chat commands until Ctrl-C.
pub async fn run_bot(bot: Bot, handler: Arc<CommandHandler>, admins: Admins) {
    let schema = Update::filter_message().endpoint(on_message);

    Dispatcher::builder(bot, schema)
        .dependencies(dptree::deps![handler, admins])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
