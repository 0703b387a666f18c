//! Line-editing REPL driving a single local `HumanGateway` session.

use std::sync::Arc;

use router_core::human::{HumanGateway, UserState};
use router_core::model::UserKey;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Run the REPL until the user quits or sends EOF (Ctrl-D).
pub async fn run(gateway: Arc<HumanGateway>, user: UserKey) -> anyhow::Result<()> {
    println!("Dialog Router testing harness. /help for commands, Ctrl-D to quit.");
    let mut editor = DefaultEditor::new()?;

    loop {
        let prompt = prompt_for(gateway.current_state(&user).await);
        match editor.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line).ok();
                dispatch(&gateway, &user, line).await;
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Bye.");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn prompt_for(state: UserState) -> String {
    match state {
        UserState::Idle => "(idle) > ".to_string(),
        UserState::InLobby => "(waiting for a partner) > ".to_string(),
        UserState::InDialog { conversation_id } => format!("(#{conversation_id}) > "),
        UserState::Evaluating { conversation_id } => format!("(#{conversation_id} evaluating) > "),
        UserState::WaitingForPartnerEvaluation { conversation_id } => format!("(#{conversation_id} waiting on partner) > "),
        UserState::WaitingForBotToken => "(bot token) > ".to_string(),
    }
}

/// Parse one line of input and drive it into the gateway.
///
/// Lines starting with `/` are commands; anything else is routed according
/// to the user's current state (bot-token entry, a free-text message, or a
/// hint if nothing is expecting input right now).
async fn dispatch(gateway: &HumanGateway, user: &UserKey, line: &str) {
    if let Some(rest) = line.strip_prefix('/') {
        let mut parts = rest.splitn(2, ' ');
        let command = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("").trim();
        run_command(gateway, user, command, arg).await;
        return;
    }

    match gateway.current_state(user).await {
        UserState::WaitingForBotToken => gateway.on_bot_token_input(user, line).await,
        UserState::InDialog { .. } => gateway.on_message_received(user, line.to_string()).await,
        _ => println!("Nothing is expecting free text right now. /help lists the available commands."),
    }
}

async fn run_command(gateway: &HumanGateway, user: &UserKey, command: &str, arg: &str) {
    match command {
        "begin" => gateway.on_begin(user).await,
        "help" => gateway.on_help(user).await,
        "end" => gateway.on_end_dialog(user).await,
        "complain" => gateway.on_complain(user).await,
        "switch" => gateway.on_switch_topic(user).await,
        "setbot" => gateway.on_set_bot(user).await,
        "score" => match arg.parse::<i32>() {
            Ok(score) => gateway.on_evaluate_dialog(user, Some(score)).await,
            Err(_) => gateway.on_evaluate_dialog(user, None).await,
        },
        "pick" => match arg.parse::<usize>() {
            Ok(idx) => gateway.on_profile_option_selected(user, idx).await,
            Err(_) => println!("usage: /pick <index>"),
        },
        "guess" => {
            if arg.is_empty() {
                println!("usage: /guess <sentence>");
            } else {
                gateway.on_profile_sentence_selected(user, arg.to_string(), None).await;
            }
        }
        "quit" => std::process::exit(0),
        other => println!("unknown command: /{other} (try /help)"),
    }
}
