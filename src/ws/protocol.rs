//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Question difficulty tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
}

/// Number of choices on every question
pub const NUM_CHOICES: usize = 4;

/// A user-authored multiple-choice question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub difficulty: Difficulty,
    pub question_text: String,
    pub correct_answer: String,
    pub tips: String,
    pub choices: Vec<String>,
}

impl Question {
    /// Check the structural invariants: exactly four choices, and the
    /// correct answer is one of them
    pub fn validate(&self) -> Result<(), QuestionError> {
        if self.choices.len() != NUM_CHOICES {
            return Err(QuestionError::WrongChoiceCount);
        }
        if !self.choices.iter().any(|c| c == &self.correct_answer) {
            return Err(QuestionError::AnswerNotAChoice);
        }
        Ok(())
    }

    /// Index of the correct choice (-1 if the question never validated)
    pub fn correct_index(&self) -> i32 {
        self.choices
            .iter()
            .position(|c| c == &self.correct_answer)
            .map(|i| i as i32)
            .unwrap_or(-1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuestionError {
    #[error("question must have exactly 4 choices")]
    WrongChoiceCount,

    #[error("correct_answer must be one of the choices")]
    AnswerNotAChoice,
}

/// One player's submission: two questions they answer themselves and two
/// prepared for the opponent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSet {
    pub my_questions: Vec<Question>,
    pub for_opponent: Vec<Question>,
}

/// Inbound message envelope; payloads stay raw until the state machine
/// knows what to expect for the type
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Client action type names
pub mod action {
    pub const CANCEL_MATCHMAKING: &str = "act_cancel_matchmaking";
    pub const SUBMIT_QUESTIONS: &str = "act_submit_questions";
    pub const BET_GNU: &str = "act_bet_gnu";
    pub const SUBMIT_ANSWER: &str = "act_submit_answer";
}

/// Payload of `act_bet_gnu`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetPayload {
    pub amount: i64,
}

/// Payload of `act_submit_answer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswerPayload {
    pub choice_index: i32,
    #[serde(default)]
    pub time_ms: i64,
}

/// Stable error codes carried by `ev_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AlreadyInQueue,
    QueueError,
    InvalidQuestions,
    QuestionTimeout,
    InvalidBet,
    OpponentDisconnected,
    ServerBusy,
    RoomFull,
    JoinFailed,
}

/// Opponent description shared in match/room notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpponentInfo {
    pub id: Uuid,
    pub github_login: String,
    pub rate: i32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gnu_balance: Option<i64>,
}

/// Game result as seen from one seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    Win,
    Lose,
    Draw,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Matchmaking registration acknowledged
    EvQueueJoined { user_id: Uuid },

    /// A pair was formed; both players move to the room channel
    EvMatchFound { room_id: Uuid, opponent: OpponentInfo },

    /// Both seats are filled; question submission may begin
    EvRoomReady {
        your_gnu_balance: i64,
        opponent: OpponentInfo,
    },

    /// A turn's question, betting bounds and timer
    EvTurnStart {
        turn: u32,
        total_turns: u32,
        difficulty: Difficulty,
        question_text: String,
        choices: Vec<String>,
        time_limit_sec: u64,
        your_gnu_balance: i64,
        min_bet: i64,
        max_bet: i64,
    },

    /// A valid bet was recorded (later valid bets replace earlier ones)
    EvBetConfirmed { amount: i64, min_bet: i64, max_bet: i64 },

    /// Per-seat outcome of a resolved turn
    EvTurnResult {
        turn: u32,
        correct_answer: String,
        correct_index: i32,
        your_answer: i32,
        is_correct: bool,
        tips: String,
        gnu_delta: i64,
        your_gnu_balance: i64,
        opponent_is_correct: bool,
        opponent_gnu_delta: i64,
    },

    /// Final scoring after turn 4
    EvGameEnd {
        result: GameOutcome,
        your_correct_count: u32,
        opponent_correct_count: u32,
        your_final_gnu: i64,
        opponent_final_gnu: i64,
        gnu_earned_this_game: i64,
    },

    /// Opponent disconnected mid-game; the remaining seat wins by TKO
    EvTko {
        message: String,
        tko_bonus: i64,
        your_final_gnu: i64,
    },

    /// Protocol or gameplay error directed at one seat
    EvError {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        min_bet: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        max_bet: Option<i64>,
    },
}

impl ServerEvent {
    /// Plain error event without betting bounds
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::EvError {
            code,
            message: message.into(),
            min_bet: None,
            max_bet: None,
        }
    }
}
