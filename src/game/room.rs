//! Per-room game state machine
//!
//! One task per live room owns the whole duel: it waits for both seats,
//! collects the question sets, plays the four betting turns and settles
//! the balances. Socket tasks only feed the inbound queue and the
//! disconnect signal.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{User, UserStore};
use crate::ws::protocol::{
    action, BetPayload, ErrorCode, GameOutcome, OpponentInfo, Question, QuestionSet, ServerEvent,
    SubmitAnswerPayload,
};

const TURN_DURATION: Duration = Duration::from_secs(15);
const QUESTION_WAIT_LIMIT: Duration = Duration::from_secs(60);
const PERSIST_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_GNU_PER_CORRECT: i64 = 100;
const TKO_BONUS: i64 = 300;
const MIN_BET: i64 = 0;
const TOTAL_TURNS: u32 = 4;
const INBOUND_CAPACITY: usize = 32;

/// Inbound message as forwarded by a seat's socket task
#[derive(Debug)]
struct SeatMsg {
    seat: usize,
    msg_type: String,
    payload: Value,
}

/// One connected player's slot in the room
struct Seat {
    user: User,
    outbox: mpsc::Sender<ServerEvent>,
    done_tx: watch::Sender<bool>,
}

impl Seat {
    async fn send(&self, event: ServerEvent) {
        if self.outbox.send(event).await.is_err() {
            debug!(user = %self.user.github_login, "seat outbox closed, dropping event");
        }
    }
}

/// Attempt to join a room that already has both seats filled
#[derive(Debug, thiserror::Error)]
#[error("room is full")]
pub struct RoomFull;

/// Bets and answers collected during one turn
struct TurnState {
    bets: [i64; 2],
    answers: [i32; 2],
    answered: [bool; 2],
}

impl Default for TurnState {
    fn default() -> Self {
        Self { bets: [0; 2], answers: [-1; 2], answered: [false; 2] }
    }
}

/// A live game room
pub struct GameRoom {
    id: Uuid,
    users: Arc<dyn UserStore>,
    seats: Mutex<Vec<Arc<Seat>>>,
    start_tx: watch::Sender<bool>,
    start_rx: watch::Receiver<bool>,
    msg_tx: mpsc::Sender<SeatMsg>,
    msg_rx: Mutex<Option<mpsc::Receiver<SeatMsg>>>,
    disconn_tx: mpsc::Sender<usize>,
    disconn_rx: Mutex<Option<mpsc::Receiver<usize>>>,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Runs the room's close-once teardown on every exit path of `run`
struct CloseGuard(Arc<GameRoom>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl GameRoom {
    pub fn new(id: Uuid, users: Arc<dyn UserStore>, on_close: Box<dyn FnOnce() + Send>) -> Self {
        let (start_tx, start_rx) = watch::channel(false);
        let (msg_tx, msg_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (disconn_tx, disconn_rx) = mpsc::channel(2);
        Self {
            id,
            users,
            seats: Mutex::new(Vec::new()),
            start_tx,
            start_rx,
            msg_tx,
            msg_rx: Mutex::new(Some(msg_rx)),
            disconn_tx,
            disconn_rx: Mutex::new(Some(disconn_rx)),
            on_close: Mutex::new(Some(on_close)),
        }
    }

    /// Seat a player in arrival order; the second join fires the start
    /// signal. Returns the seat index and the seat's done signal.
    pub fn join(
        &self,
        outbox: mpsc::Sender<ServerEvent>,
        user: User,
    ) -> Result<(usize, watch::Receiver<bool>), RoomFull> {
        let mut seats = self.seats.lock();
        if seats.len() >= 2 {
            return Err(RoomFull);
        }

        let (done_tx, done_rx) = watch::channel(false);
        seats.push(Arc::new(Seat { user, outbox, done_tx }));
        let seat = seats.len() - 1;

        if seats.len() == 2 {
            let _ = self.start_tx.send(true);
        }
        Ok((seat, done_rx))
    }

    /// Forward one decoded envelope from a seat's socket. A full queue
    /// drops the message and tells the offender to retry.
    pub fn push_message(&self, seat: usize, msg_type: String, payload: Value) {
        match self.msg_tx.try_send(SeatMsg { seat, msg_type, payload }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(room_id = %self.id, seat, "inbound queue full, dropping message");
                let outbox = self.seats.lock().get(seat).map(|s| s.outbox.clone());
                if let Some(outbox) = outbox {
                    let _ = outbox.try_send(ServerEvent::error(
                        ErrorCode::ServerBusy,
                        "server is busy, please send again",
                    ));
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(room_id = %self.id, seat, "room loop finished, dropping message");
            }
        }
    }

    /// Called once by a seat's socket task when its read loop exits
    pub fn notify_disconnect(&self, seat: usize) {
        if let Some(s) = self.seats.lock().get(seat) {
            let _ = s.done_tx.send(true);
        }
        let _ = self.disconn_tx.try_send(seat);
    }

    fn close(&self) {
        if let Some(on_close) = self.on_close.lock().take() {
            on_close();
        }
    }

    /// The state machine. Spawned exactly once, by the seat-0 joiner.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let _teardown = CloseGuard(self.clone());

        let Some(mut msg_rx) = self.msg_rx.lock().take() else { return };
        let Some(mut disconn_rx) = self.disconn_rx.lock().take() else { return };

        info!(room_id = %self.id, "waiting for both players");

        let mut start_rx = self.start_rx.clone();
        let wait_for_start = async { start_rx.wait_for(|ready| *ready).await.is_ok() };
        tokio::select! {
            started = wait_for_start => {
                if !started {
                    return;
                }
            }
            maybe_seat = disconn_rx.recv() => {
                if let Some(seat) = maybe_seat {
                    info!(room_id = %self.id, seat, "player disconnected before game start");
                    self.notify_opponent_disconnect(seat).await;
                }
                return;
            }
            _ = cancel.cancelled() => return,
        }

        let seats: [Arc<Seat>; 2] = {
            let snapshot = self.seats.lock().clone();
            match <[Arc<Seat>; 2]>::try_from(snapshot) {
                Ok(seats) => seats,
                Err(_) => return,
            }
        };
        let mut balances = [seats[0].user.gnu_balance, seats[1].user.gnu_balance];

        info!(room_id = %self.id, "both players joined, starting game");

        for (i, seat) in seats.iter().enumerate() {
            let opp = &seats[1 - i];
            seat.send(ServerEvent::EvRoomReady {
                your_gnu_balance: balances[i],
                opponent: OpponentInfo {
                    id: opp.user.id,
                    github_login: opp.user.github_login.clone(),
                    rate: opp.user.rate,
                    gnu_balance: Some(balances[1 - i]),
                },
            })
            .await;
        }

        // Question-exchange phase
        let mut submitted: [Option<QuestionSet>; 2] = [None, None];
        let question_deadline = sleep(QUESTION_WAIT_LIMIT);
        tokio::pin!(question_deadline);

        while submitted.iter().any(|s| s.is_none()) {
            tokio::select! {
                _ = &mut question_deadline => {
                    info!(room_id = %self.id, "timed out waiting for questions");
                    for seat in &seats {
                        seat.send(ServerEvent::error(
                            ErrorCode::QuestionTimeout,
                            "question submission timed out",
                        ))
                        .await;
                    }
                    return;
                }
                maybe_seat = disconn_rx.recv() => {
                    if let Some(seat) = maybe_seat {
                        info!(room_id = %self.id, seat, "player disconnected during question phase");
                        self.notify_opponent_disconnect(seat).await;
                    }
                    return;
                }
                _ = cancel.cancelled() => return,
                maybe_msg = msg_rx.recv() => {
                    let Some(msg) = maybe_msg else { return };
                    self.handle_question_submission(&seats, msg, &mut submitted).await;
                }
            }
        }

        let (set0, set1) = match (submitted[0].take(), submitted[1].take()) {
            (Some(a), Some(b)) => (a, b),
            _ => return,
        };

        info!(room_id = %self.id, "all questions received, starting turns");

        // Each player answers two questions prepared by the opponent and
        // two of their own, easy to hard.
        let schedule: [(&Question, &Question); 4] = [
            (&set1.for_opponent[0], &set0.for_opponent[0]),
            (&set0.my_questions[0], &set1.my_questions[0]),
            (&set1.for_opponent[1], &set0.for_opponent[1]),
            (&set0.my_questions[1], &set1.my_questions[1]),
        ];

        let mut correct_counts = [0u32; 2];
        let mut earned = [0i64; 2];

        for (turn_idx, (q0, q1)) in schedule.iter().enumerate() {
            let turn_no = turn_idx as u32 + 1;
            let questions = [*q0, *q1];

            for (i, seat) in seats.iter().enumerate() {
                let q = questions[i];
                seat.send(ServerEvent::EvTurnStart {
                    turn: turn_no,
                    total_turns: TOTAL_TURNS,
                    difficulty: q.difficulty,
                    question_text: q.question_text.clone(),
                    choices: q.choices.clone(),
                    time_limit_sec: TURN_DURATION.as_secs(),
                    your_gnu_balance: balances[i],
                    min_bet: MIN_BET,
                    max_bet: balances[i],
                })
                .await;
            }

            let mut turn = TurnState::default();
            let turn_deadline = sleep(TURN_DURATION);
            tokio::pin!(turn_deadline);

            loop {
                tokio::select! {
                    _ = &mut turn_deadline => {
                        info!(room_id = %self.id, turn = turn_no, "turn timed out");
                        break;
                    }
                    maybe_seat = disconn_rx.recv() => {
                        if let Some(seat) = maybe_seat {
                            info!(room_id = %self.id, seat, turn = turn_no, "player disconnected mid-turn");
                            self.handle_tko(&seats, seat, &mut balances).await;
                        }
                        return;
                    }
                    _ = cancel.cancelled() => return,
                    maybe_msg = msg_rx.recv() => {
                        let Some(msg) = maybe_msg else { return };
                        self.handle_turn_message(&seats, msg, &balances, &mut turn).await;
                        if turn.answered == [true, true] {
                            break;
                        }
                    }
                }
            }

            let mut deltas = [0i64; 2];
            let mut corrects = [false; 2];
            for i in 0..2 {
                let correct =
                    turn.answered[i] && turn.answers[i] == questions[i].correct_index();
                let (delta, new_balance) = resolve_seat(correct, turn.bets[i], balances[i]);
                corrects[i] = correct;
                deltas[i] = delta;
                balances[i] = new_balance;
                earned[i] += delta;
                if correct {
                    correct_counts[i] += 1;
                }
            }

            for (i, seat) in seats.iter().enumerate() {
                let q = questions[i];
                seat.send(ServerEvent::EvTurnResult {
                    turn: turn_no,
                    correct_answer: q.correct_answer.clone(),
                    correct_index: q.correct_index(),
                    your_answer: turn.answers[i],
                    is_correct: corrects[i],
                    tips: q.tips.clone(),
                    gnu_delta: deltas[i],
                    your_gnu_balance: balances[i],
                    opponent_is_correct: corrects[1 - i],
                    opponent_gnu_delta: deltas[1 - i],
                })
                .await;
            }

            info!(
                room_id = %self.id,
                turn = turn_no,
                p0_correct = corrects[0],
                p0_delta = deltas[0],
                p1_correct = corrects[1],
                p1_delta = deltas[1],
                "turn resolved"
            );
        }

        // Final scoring
        let outcomes = decide_outcomes(correct_counts, earned);
        for (i, seat) in seats.iter().enumerate() {
            seat.send(ServerEvent::EvGameEnd {
                result: outcomes[i],
                your_correct_count: correct_counts[i],
                opponent_correct_count: correct_counts[1 - i],
                your_final_gnu: balances[i],
                opponent_final_gnu: balances[1 - i],
                gnu_earned_this_game: earned[i],
            })
            .await;
        }

        info!(
            room_id = %self.id,
            p0_balance = balances[0],
            p1_balance = balances[1],
            "game finished"
        );

        self.persist_balances(&seats, &balances).await;
    }

    async fn handle_question_submission(
        &self,
        seats: &[Arc<Seat>; 2],
        msg: SeatMsg,
        submitted: &mut [Option<QuestionSet>; 2],
    ) {
        if msg.msg_type != action::SUBMIT_QUESTIONS {
            return;
        }
        // first write wins
        if submitted[msg.seat].is_some() {
            return;
        }
        let seat = &seats[msg.seat];

        let mut set: QuestionSet = match serde_json::from_value(msg.payload) {
            Ok(set) => set,
            Err(e) => {
                warn!(room_id = %self.id, seat = msg.seat, error = %e, "malformed question payload");
                seat.send(ServerEvent::error(
                    ErrorCode::InvalidQuestions,
                    "malformed question payload",
                ))
                .await;
                return;
            }
        };

        if set.my_questions.len() < 2 || set.for_opponent.len() < 2 {
            seat.send(ServerEvent::error(
                ErrorCode::InvalidQuestions,
                "my_questions and for_opponent need two questions each",
            ))
            .await;
            return;
        }
        for q in set.my_questions.iter().take(2).chain(set.for_opponent.iter().take(2)) {
            if let Err(e) = q.validate() {
                seat.send(ServerEvent::error(ErrorCode::InvalidQuestions, e.to_string())).await;
                return;
            }
        }

        set.my_questions.truncate(2);
        set.for_opponent.truncate(2);
        submitted[msg.seat] = Some(set);
        info!(room_id = %self.id, seat = msg.seat, "questions submitted");
    }

    async fn handle_turn_message(
        &self,
        seats: &[Arc<Seat>; 2],
        msg: SeatMsg,
        balances: &[i64; 2],
        turn: &mut TurnState,
    ) {
        match msg.msg_type.as_str() {
            action::BET_GNU => {
                // bets after answering are silently dropped
                if turn.answered[msg.seat] {
                    return;
                }
                let Ok(bet) = serde_json::from_value::<BetPayload>(msg.payload) else {
                    return;
                };
                let max_bet = balances[msg.seat];
                if bet.amount < MIN_BET || bet.amount > max_bet {
                    seats[msg.seat]
                        .send(ServerEvent::EvError {
                            code: ErrorCode::InvalidBet,
                            message: format!("bet must be between {MIN_BET} and {max_bet}"),
                            min_bet: Some(MIN_BET),
                            max_bet: Some(max_bet),
                        })
                        .await;
                    return;
                }
                turn.bets[msg.seat] = bet.amount;
                seats[msg.seat]
                    .send(ServerEvent::EvBetConfirmed {
                        amount: bet.amount,
                        min_bet: MIN_BET,
                        max_bet,
                    })
                    .await;
                debug!(room_id = %self.id, seat = msg.seat, amount = bet.amount, "bet recorded");
            }
            action::SUBMIT_ANSWER => {
                // first answer wins
                if turn.answered[msg.seat] {
                    return;
                }
                let Ok(answer) = serde_json::from_value::<SubmitAnswerPayload>(msg.payload) else {
                    return;
                };
                turn.answers[msg.seat] = answer.choice_index;
                turn.answered[msg.seat] = true;
                debug!(
                    room_id = %self.id,
                    seat = msg.seat,
                    choice = answer.choice_index,
                    time_ms = answer.time_ms,
                    "answer recorded"
                );
            }
            _ => {}
        }
    }

    /// The remaining seat wins by TKO; both balances persist best-effort
    async fn handle_tko(
        &self,
        seats: &[Arc<Seat>; 2],
        disconnected: usize,
        balances: &mut [i64; 2],
    ) {
        let remaining = 1 - disconnected;
        balances[remaining] += TKO_BONUS;

        seats[remaining]
            .send(ServerEvent::EvTko {
                message: "Your opponent disconnected. You win by TKO!".to_string(),
                tko_bonus: TKO_BONUS,
                your_final_gnu: balances[remaining],
            })
            .await;

        info!(
            room_id = %self.id,
            winner = %seats[remaining].user.github_login,
            bonus = TKO_BONUS,
            "TKO"
        );

        self.persist_balances(seats, balances).await;
    }

    async fn notify_opponent_disconnect(&self, disconnected: usize) {
        let opponent = self.seats.lock().get(1 - disconnected).cloned();
        if let Some(seat) = opponent {
            seat.send(ServerEvent::error(
                ErrorCode::OpponentDisconnected,
                "your opponent disconnected",
            ))
            .await;
        }
    }

    async fn persist_balances(&self, seats: &[Arc<Seat>; 2], balances: &[i64; 2]) {
        for (i, seat) in seats.iter().enumerate() {
            let write = self.users.update_gnu_balance(seat.user.id, balances[i]);
            match timeout(PERSIST_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    room_id = %self.id,
                    user = %seat.user.github_login,
                    error = %e,
                    "failed to persist gnu balance"
                ),
                Err(_) => warn!(
                    room_id = %self.id,
                    user = %seat.user.github_login,
                    "gnu balance persistence timed out"
                ),
            }
        }
    }
}

/// Settle one seat's turn: a correct answer earns the base award plus the
/// bet; a wrong answer loses the bet, with the balance clamped at zero
fn resolve_seat(correct: bool, bet: i64, balance: i64) -> (i64, i64) {
    if correct {
        let delta = BASE_GNU_PER_CORRECT + bet;
        (delta, balance + delta)
    } else {
        (-bet, (balance - bet).max(0))
    }
}

/// Winner by correct answers, then by gnu earned, else a draw
fn decide_outcomes(correct_counts: [u32; 2], earned: [i64; 2]) -> [GameOutcome; 2] {
    use std::cmp::Ordering;
    match correct_counts[0].cmp(&correct_counts[1]).then(earned[0].cmp(&earned[1])) {
        Ordering::Greater => [GameOutcome::Win, GameOutcome::Lose],
        Ordering::Less => [GameOutcome::Lose, GameOutcome::Win],
        Ordering::Equal => [GameOutcome::Draw, GameOutcome::Draw],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MemoryUserStore;
    use crate::ws::protocol::Difficulty;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn trivia(difficulty: Difficulty) -> Question {
        Question {
            difficulty,
            question_text: "2 + 2 = ?".into(),
            correct_answer: "4".into(),
            tips: "basic arithmetic".into(),
            choices: vec!["3".into(), "4".into(), "5".into(), "6".into()],
        }
    }

    // correct choice index is 1 for every question in this set
    fn full_set() -> QuestionSet {
        QuestionSet {
            my_questions: vec![trivia(Difficulty::Easy), trivia(Difficulty::Hard)],
            for_opponent: vec![trivia(Difficulty::Easy), trivia(Difficulty::Normal)],
        }
    }

    struct Harness {
        room: Arc<GameRoom>,
        users: Arc<MemoryUserStore>,
        user_ids: [Uuid; 2],
        rxs: [mpsc::Receiver<ServerEvent>; 2],
        closed: Arc<AtomicBool>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        async fn next(&mut self, seat: usize) -> ServerEvent {
            self.rxs[seat].recv().await.expect("room closed the outbox early")
        }

        fn submit_questions(&self, seat: usize) {
            self.room.push_message(
                seat,
                action::SUBMIT_QUESTIONS.into(),
                serde_json::to_value(full_set()).unwrap(),
            );
        }

        fn bet(&self, seat: usize, amount: i64) {
            self.room.push_message(
                seat,
                action::BET_GNU.into(),
                serde_json::json!({ "amount": amount }),
            );
        }

        fn answer(&self, seat: usize, choice_index: i32) {
            self.room.push_message(
                seat,
                action::SUBMIT_ANSWER.into(),
                serde_json::json!({ "choice_index": choice_index, "time_ms": 1200 }),
            );
        }

        /// Drive both seats past `ev_room_ready` and the question phase
        async fn through_question_phase(&mut self) {
            for seat in 0..2 {
                let ready = self.next(seat).await;
                assert!(matches!(ready, ServerEvent::EvRoomReady { .. }), "got {ready:?}");
            }
            self.submit_questions(0);
            self.submit_questions(1);
        }

        async fn expect_turn_start(&mut self, seat: usize) -> (u32, Difficulty, i64) {
            match self.next(seat).await {
                ServerEvent::EvTurnStart { turn, difficulty, max_bet, total_turns, min_bet, time_limit_sec, .. } => {
                    assert_eq!(total_turns, 4);
                    assert_eq!(min_bet, 0);
                    assert_eq!(time_limit_sec, 15);
                    (turn, difficulty, max_bet)
                }
                other => panic!("expected ev_turn_start, got {other:?}"),
            }
        }

        async fn expect_turn_result(&mut self, seat: usize) -> (bool, i64, i64) {
            match self.next(seat).await {
                ServerEvent::EvTurnResult { is_correct, gnu_delta, your_gnu_balance, .. } => {
                    (is_correct, gnu_delta, your_gnu_balance)
                }
                other => panic!("expected ev_turn_result, got {other:?}"),
            }
        }
    }

    fn start_room(initial: [i64; 2]) -> Harness {
        let users = Arc::new(MemoryUserStore::new());
        let u0 = users.add_user("p0", 1, initial[0]);
        let u1 = users.add_user("p1", 2, initial[1]);

        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();
        let room = Arc::new(GameRoom::new(
            Uuid::new_v4(),
            users.clone(),
            Box::new(move || closed_flag.store(true, Ordering::SeqCst)),
        ));

        let (tx0, rx0) = mpsc::channel(64);
        let (tx1, rx1) = mpsc::channel(64);
        let (seat0, _) = room.join(tx0, u0.clone()).unwrap();
        let (seat1, _) = room.join(tx1, u1.clone()).unwrap();
        assert_eq!((seat0, seat1), (0, 1));

        let handle = tokio::spawn(room.clone().run(CancellationToken::new()));
        Harness {
            room,
            users,
            user_ids: [u0.id, u1.id],
            rxs: [rx0, rx1],
            closed,
            handle,
        }
    }

    #[test]
    fn resolving_a_correct_answer_awards_base_plus_bet() {
        assert_eq!(resolve_seat(true, 0, 1000), (100, 1100));
        assert_eq!(resolve_seat(true, 250, 1000), (350, 1350));
        // all-in and correct: balance doubles plus the base award
        assert_eq!(resolve_seat(true, 1000, 1000), (1100, 2100));
    }

    #[test]
    fn resolving_a_wrong_answer_loses_the_bet_and_clamps_at_zero() {
        assert_eq!(resolve_seat(false, 0, 1000), (0, 1000));
        assert_eq!(resolve_seat(false, 400, 1000), (-400, 600));
        // all-in and wrong: clamped to zero, delta still reports the bet
        assert_eq!(resolve_seat(false, 1000, 1000), (-1000, 0));
    }

    #[test]
    fn outcomes_break_ties_by_correct_count_then_earnings() {
        use GameOutcome::*;
        assert_eq!(decide_outcomes([3, 1], [0, 500]), [Win, Lose]);
        assert_eq!(decide_outcomes([2, 2], [300, 100]), [Win, Lose]);
        assert_eq!(decide_outcomes([2, 2], [100, 300]), [Lose, Win]);
        assert_eq!(decide_outcomes([2, 2], [200, 200]), [Draw, Draw]);
    }

    #[tokio::test]
    async fn third_joiner_is_rejected() {
        let users = Arc::new(MemoryUserStore::new());
        let room = Arc::new(GameRoom::new(Uuid::new_v4(), users.clone(), Box::new(|| {})));

        for login in ["a", "b"] {
            let user = users.add_user(login, 1, 1000);
            let (tx, _rx) = mpsc::channel(4);
            room.join(tx, user).unwrap();
        }

        let late = users.add_user("c", 3, 1000);
        let (tx, _rx) = mpsc::channel(4);
        assert!(room.join(tx, late).is_err());
    }

    #[tokio::test]
    async fn teardown_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let room = GameRoom::new(
            Uuid::new_v4(),
            Arc::new(MemoryUserStore::new()),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        room.close();
        room.close();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overflowing_the_inbound_queue_reports_server_busy() {
        let users = Arc::new(MemoryUserStore::new());
        let user = users.add_user("a", 1, 1000);
        let room = GameRoom::new(Uuid::new_v4(), users, Box::new(|| {}));
        let (tx, mut rx) = mpsc::channel(64);
        room.join(tx, user).unwrap();

        // nothing drains the queue, so pushes past its capacity drop
        for _ in 0..(INBOUND_CAPACITY + 1) {
            room.push_message(0, action::BET_GNU.into(), serde_json::json!({ "amount": 0 }));
        }

        match rx.recv().await.unwrap() {
            ServerEvent::EvError { code, .. } => assert_eq!(code, ErrorCode::ServerBusy),
            other => panic!("expected server_busy, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_ends_in_a_draw() {
        let mut h = start_room([1000, 1000]);
        h.through_question_phase().await;

        let expected_difficulty =
            [Difficulty::Easy, Difficulty::Easy, Difficulty::Normal, Difficulty::Hard];
        for turn in 1..=4u32 {
            for seat in 0..2 {
                let (turn_no, difficulty, max_bet) = h.expect_turn_start(seat).await;
                assert_eq!(turn_no, turn);
                assert_eq!(difficulty, expected_difficulty[(turn - 1) as usize]);
                assert_eq!(max_bet, 1000 + (turn as i64 - 1) * 100);
            }
            h.answer(0, 1);
            h.answer(1, 1);
            for seat in 0..2 {
                let (correct, delta, balance) = h.expect_turn_result(seat).await;
                assert!(correct);
                assert_eq!(delta, 100);
                assert_eq!(balance, 1000 + turn as i64 * 100);
            }
        }

        for seat in 0..2 {
            match h.next(seat).await {
                ServerEvent::EvGameEnd {
                    result,
                    your_correct_count,
                    opponent_correct_count,
                    your_final_gnu,
                    gnu_earned_this_game,
                    ..
                } => {
                    assert_eq!(result, GameOutcome::Draw);
                    assert_eq!(your_correct_count, 4);
                    assert_eq!(opponent_correct_count, 4);
                    assert_eq!(your_final_gnu, 1400);
                    assert_eq!(gnu_earned_this_game, 400);
                }
                other => panic!("expected ev_game_end, got {other:?}"),
            }
        }

        h.handle.await.unwrap();
        assert!(h.closed.load(Ordering::SeqCst));
        let updates = h.users.balance_updates.lock().clone();
        assert!(updates.contains(&(h.user_ids[0], 1400)));
        assert!(updates.contains(&(h.user_ids[1], 1400)));
    }

    #[tokio::test(start_paused = true)]
    async fn betting_player_dominates_and_wins() {
        let mut h = start_room([1000, 1000]);
        h.through_question_phase().await;

        let mut balance0 = 1000i64;
        for turn in 1..=4u32 {
            let (_, _, max0) = h.expect_turn_start(0).await;
            let (_, _, max1) = h.expect_turn_start(1).await;
            assert_eq!(max0, balance0);
            assert_eq!(max1, 1000 - (turn as i64 - 1) * 10);

            let bet0 = if turn == 1 { 0 } else { balance0 / 2 };
            if bet0 > 0 {
                h.bet(0, bet0);
                match h.next(0).await {
                    ServerEvent::EvBetConfirmed { amount, .. } => assert_eq!(amount, bet0),
                    other => panic!("expected ev_bet_confirmed, got {other:?}"),
                }
            }
            h.bet(1, 10);
            match h.next(1).await {
                ServerEvent::EvBetConfirmed { amount, .. } => assert_eq!(amount, 10),
                other => panic!("expected ev_bet_confirmed, got {other:?}"),
            }

            h.answer(0, 1); // correct
            h.answer(1, 0); // wrong

            let (correct0, delta0, new_balance0) = h.expect_turn_result(0).await;
            assert!(correct0);
            assert_eq!(delta0, 100 + bet0);
            balance0 += delta0;
            assert_eq!(new_balance0, balance0);

            let (correct1, delta1, _) = h.expect_turn_result(1).await;
            assert!(!correct1);
            assert_eq!(delta1, -10);
        }

        match h.next(0).await {
            ServerEvent::EvGameEnd { result, your_correct_count, .. } => {
                assert_eq!(result, GameOutcome::Win);
                assert_eq!(your_correct_count, 4);
            }
            other => panic!("expected ev_game_end, got {other:?}"),
        }
        match h.next(1).await {
            ServerEvent::EvGameEnd {
                result,
                your_correct_count,
                your_final_gnu,
                gnu_earned_this_game,
                ..
            } => {
                assert_eq!(result, GameOutcome::Lose);
                assert_eq!(your_correct_count, 0);
                assert_eq!(your_final_gnu, 960);
                assert_eq!(gnu_earned_this_game, -40);
            }
            other => panic!("expected ev_game_end, got {other:?}"),
        }

        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn mid_game_disconnect_awards_tko_bonus() {
        let mut h = start_room([1000, 1000]);
        h.through_question_phase().await;

        // turn 1 plays out normally
        h.expect_turn_start(0).await;
        h.expect_turn_start(1).await;
        h.answer(0, 1);
        h.answer(1, 1);
        h.expect_turn_result(0).await;
        h.expect_turn_result(1).await;

        // seat 1 drops at the start of turn 2
        h.expect_turn_start(0).await;
        h.expect_turn_start(1).await;
        h.room.notify_disconnect(1);

        match h.next(0).await {
            ServerEvent::EvTko { tko_bonus, your_final_gnu, .. } => {
                assert_eq!(tko_bonus, 300);
                assert_eq!(your_final_gnu, 1100 + 300);
            }
            other => panic!("expected ev_tko, got {other:?}"),
        }

        h.handle.await.unwrap();
        assert!(h.closed.load(Ordering::SeqCst));
        let updates = h.users.balance_updates.lock().clone();
        assert!(updates.contains(&(h.user_ids[0], 1400)));
        assert!(updates.contains(&(h.user_ids[1], 1100)));
    }

    #[tokio::test(start_paused = true)]
    async fn question_timeout_notifies_both_and_closes() {
        let mut h = start_room([1000, 1000]);
        for seat in 0..2 {
            let ready = h.next(seat).await;
            assert!(matches!(ready, ServerEvent::EvRoomReady { .. }));
        }
        h.submit_questions(0); // seat 1 never submits

        for seat in 0..2 {
            match h.next(seat).await {
                ServerEvent::EvError { code, .. } => assert_eq!(code, ErrorCode::QuestionTimeout),
                other => panic!("expected question_timeout, got {other:?}"),
            }
        }

        h.handle.await.unwrap();
        assert!(h.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn question_phase_disconnect_is_not_a_tko() {
        let mut h = start_room([1000, 1000]);
        for seat in 0..2 {
            h.next(seat).await;
        }
        h.room.notify_disconnect(1);

        match h.next(0).await {
            ServerEvent::EvError { code, .. } => assert_eq!(code, ErrorCode::OpponentDisconnected),
            other => panic!("expected opponent_disconnected, got {other:?}"),
        }
        h.handle.await.unwrap();
        assert!(h.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_bets_are_rejected_and_later_bets_replace() {
        let mut h = start_room([1000, 1000]);
        h.through_question_phase().await;
        h.expect_turn_start(0).await;
        h.expect_turn_start(1).await;

        h.bet(0, 2000);
        match h.next(0).await {
            ServerEvent::EvError { code, min_bet, max_bet, .. } => {
                assert_eq!(code, ErrorCode::InvalidBet);
                assert_eq!((min_bet, max_bet), (Some(0), Some(1000)));
            }
            other => panic!("expected invalid_bet, got {other:?}"),
        }

        h.bet(0, 100);
        assert!(matches!(h.next(0).await, ServerEvent::EvBetConfirmed { amount: 100, .. }));
        h.bet(0, 250);
        assert!(matches!(h.next(0).await, ServerEvent::EvBetConfirmed { amount: 250, .. }));

        h.answer(0, 1); // correct with the replacing bet
        h.answer(1, 0); // wrong without a bet

        let (correct0, delta0, balance0) = h.expect_turn_result(0).await;
        assert!(correct0);
        assert_eq!(delta0, 350);
        assert_eq!(balance0, 1350);
        let (_, delta1, balance1) = h.expect_turn_result(1).await;
        assert_eq!(delta1, 0);
        assert_eq!(balance1, 1000);

        // turn 2 opens before the disconnect lands
        h.expect_turn_start(0).await;
        h.expect_turn_start(1).await;
        h.room.notify_disconnect(1);
        assert!(matches!(h.next(0).await, ServerEvent::EvTko { .. }));
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn bets_after_answering_are_dropped() {
        let mut h = start_room([1000, 1000]);
        h.through_question_phase().await;
        h.expect_turn_start(0).await;
        h.expect_turn_start(1).await;

        h.answer(0, 1);
        h.bet(0, 500); // too late for this turn
        h.answer(1, 1);

        // no ev_bet_confirmed arrives; the next event is the result with
        // only the base award
        let (correct0, delta0, _) = h.expect_turn_result(0).await;
        assert!(correct0);
        assert_eq!(delta0, 100);
        h.expect_turn_result(1).await;

        h.expect_turn_start(0).await;
        h.expect_turn_start(1).await;
        h.room.notify_disconnect(1);
        assert!(matches!(h.next(0).await, ServerEvent::EvTko { .. }));
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_turn_scores_as_wrong_and_loses_the_bet() {
        let mut h = start_room([1000, 1000]);
        h.through_question_phase().await;
        h.expect_turn_start(0).await;
        h.expect_turn_start(1).await;

        h.bet(0, 200);
        assert!(matches!(h.next(0).await, ServerEvent::EvBetConfirmed { .. }));
        h.answer(1, 1);
        // seat 0 never answers; the 15 s timer resolves the turn

        let (correct0, delta0, balance0) = h.expect_turn_result(0).await;
        assert!(!correct0);
        assert_eq!(delta0, -200);
        assert_eq!(balance0, 800);
        h.expect_turn_result(1).await;

        h.expect_turn_start(0).await;
        h.expect_turn_start(1).await;
        h.room.notify_disconnect(1);
        assert!(matches!(h.next(0).await, ServerEvent::EvTko { .. }));
        h.handle.await.unwrap();
    }
}
