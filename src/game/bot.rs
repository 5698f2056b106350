//! Dev-only bot player
//!
//! The bot is an ordinary client: it dials the server's own room endpoint
//! and plays the duel over the wire protocol, with canned questions and
//! random answers. Gated behind the development environment by the router.

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::User;
use crate::ws::protocol::{action, Difficulty, Question, QuestionSet, ServerEvent};

type BotSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connect to the given room and play it to the end
pub async fn run_bot_player(server_addr: &str, room_id: Uuid, bot_user: &User, origin: &str) {
    let url = format!(
        "ws://{server_addr}/ws/room/{room_id}?github_login={}&github_id={}",
        bot_user.github_login, bot_user.github_id
    );

    // brief grace so the human player lands on seat 0
    sleep(Duration::from_millis(500)).await;

    let mut request = match url.into_client_request() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "bot: bad room url");
            return;
        }
    };
    let Ok(origin_value) = HeaderValue::from_str(origin) else {
        warn!(origin, "bot: bad origin header");
        return;
    };
    request.headers_mut().insert(header::ORIGIN, origin_value);

    let (socket, _) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "bot: failed to connect");
            return;
        }
    };
    info!(room_id = %room_id, "bot connected");

    let (mut sink, mut stream) = socket.split();

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(room_id = %room_id, error = %e, "bot: socket error");
                break;
            }
        };
        let Ok(event) = serde_json::from_str::<ServerEvent>(&text) else {
            continue;
        };

        match event {
            ServerEvent::EvRoomReady { .. } => {
                sleep(Duration::from_millis(300)).await;
                let Ok(payload) = serde_json::to_value(bot_question_set()) else {
                    break;
                };
                send_action(&mut sink, action::SUBMIT_QUESTIONS, payload).await;
                info!(room_id = %room_id, "bot submitted questions");
            }
            ServerEvent::EvTurnStart { choices, max_bet, .. } => {
                // random bet up to a fifth of the balance
                let bet = if max_bet > 0 {
                    rand::thread_rng().gen_range(0..=max_bet / 5)
                } else {
                    0
                };
                let pre_bet_ms = rand::thread_rng().gen_range(500..1500u64);
                sleep(Duration::from_millis(pre_bet_ms)).await;
                send_action(&mut sink, action::BET_GNU, json!({ "amount": bet })).await;

                // think for a human-looking while, then guess
                let think_ms = rand::thread_rng().gen_range(2000..10000u64);
                sleep(Duration::from_millis(think_ms)).await;
                let choice = if choices.is_empty() {
                    0
                } else {
                    rand::thread_rng().gen_range(0..choices.len()) as i32
                };
                send_action(
                    &mut sink,
                    action::SUBMIT_ANSWER,
                    json!({ "choice_index": choice, "time_ms": think_ms }),
                )
                .await;
                info!(room_id = %room_id, choice, "bot answered");
            }
            ServerEvent::EvGameEnd { .. } | ServerEvent::EvTko { .. } => {
                info!(room_id = %room_id, "bot game finished");
                break;
            }
            ServerEvent::EvError { code, message, .. } => {
                warn!(room_id = %room_id, ?code, %message, "bot received error");
                break;
            }
            _ => {}
        }
    }

    let _ = sink.close().await;
}

async fn send_action(sink: &mut BotSink, msg_type: &str, payload: serde_json::Value) {
    let frame = json!({ "type": msg_type, "payload": payload }).to_string();
    if let Err(e) = sink.send(Message::Text(frame)).await {
        warn!(error = %e, "bot: write failed");
    }
}

fn bot_question(
    difficulty: Difficulty,
    text: &str,
    correct: &str,
    tips: &str,
    choices: [&str; 4],
) -> Question {
    Question {
        difficulty,
        question_text: text.to_string(),
        correct_answer: correct.to_string(),
        tips: tips.to_string(),
        choices: choices.iter().map(|c| c.to_string()).collect(),
    }
}

/// The bot's canned submission; the schedule expects easy/hard for its own
/// questions and easy/normal for the opponent's
fn bot_question_set() -> QuestionSet {
    QuestionSet {
        my_questions: vec![
            bot_question(
                Difficulty::Easy,
                "Which keyword declares a variable binding in Rust?",
                "let",
                "`let` introduces a new binding; add `mut` to make it mutable.",
                ["let", "var", "def", "dim"],
            ),
            bot_question(
                Difficulty::Hard,
                "Which trait marks a type as safe to move across threads?",
                "Send",
                "`Send` allows transferring ownership between threads; `Sync` allows shared references.",
                ["Send", "Sync", "Copy", "Unpin"],
            ),
        ],
        for_opponent: vec![
            bot_question(
                Difficulty::Easy,
                "What does HTTP status 404 mean?",
                "Not Found",
                "404 means the requested resource does not exist.",
                ["Not Found", "Forbidden", "Unauthorized", "Bad Request"],
            ),
            bot_question(
                Difficulty::Normal,
                "Which command rewrites the most recent commit message?",
                "git commit --amend",
                "`--amend` replaces the last commit; already-pushed branches need a force push.",
                ["git commit --amend", "git rebase -i", "git reset HEAD~1", "git revert HEAD"],
            ),
        ],
    }
}
