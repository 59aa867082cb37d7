#![no_std]

use soroban_sdk::{
  contract, contracterror, contractimpl, contracttype, symbol_short,
  Address, BytesN, Env, String, Symbol, Vec,
};

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
  GameNotFound = 1,
  RoomNotFound = 2,
  NotPlayer = 3,
  NotYourTurn = 4,
  GameNotInProgress = 5,
  GameNotWaiting = 6,
  CannotPlaySelf = 7,
  AlreadyInGame = 8,
  InvalidRoomId = 9,
  RoomTaken = 10,
  InvalidColumn = 11,
  ColumnFull = 12,
  InvalidSessionExpiry = 13,
  SessionKeyNotFound = 14,
  SessionKeyNotActive = 15,
  SessionKeyExpired = 16,
  NotSessionOwner = 17,
  SelfDelegation = 18,
  GameNotStale = 19,
}

#[contracttype]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Cell {
  Empty = 0,
  Player1 = 1,
  Player2 = 2,
}

#[contracttype]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum GameStatus {
  WaitingForPlayer = 0,
  InProgress = 1,
  Finished = 2,
  Abandoned = 3,
}

/// A play session. `board` is row-major with row 0 at the top, so pieces
/// dropped into a column land at the highest free row index. A `Finished`
/// game with `winner == None` is a draw.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Game {
  pub id: u64,
  pub player1: Address,
  pub player2: Option<Address>,
  pub board: Vec<Cell>,
  pub current_player: Address,
  pub status: GameStatus,
  pub winner: Option<Address>,
  pub created_at: u64,
  pub started_at: u64,
  pub last_move_at: u64,
  pub room_id: String,
  pub move_count: u32,
}

/// Append-only audit record; never replayed.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameMove {
  pub game_id: u64,
  pub player: Address,
  pub column: u32,
  pub row: u32,
  pub timestamp: u64,
}

/// Delegated-signing grant. Revocation flips `is_active`; the record itself
/// stays queryable forever.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionKeyRecord {
  pub owner: Address,
  pub expiry_time: u64,
  pub is_active: bool,
}

/// Endpoints of a completed four-in-a-row, for client-side highlighting.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WinningLine {
  pub start_row: u32,
  pub start_col: u32,
  pub end_row: u32,
  pub end_col: u32,
}

#[contracttype]
#[derive(Clone)]
pub enum DataKey { Admin, TotalGames, Game(u64), Moves(u64), Room(String), ActiveGame(Address), Session(Address) }

const ROWS: u32 = 6;
const COLS: u32 = 7;
const BOARD_CELLS: u32 = ROWS * COLS;
const MAX_ROOM_ID_LEN: u32 = 20;

const MOVE_TIMEOUT: u64 = 300;
const GAME_TIMEOUT: u64 = 600;
const MAX_SESSION_KEY_TTL: u64 = 2_592_000;

const GAME_TTL_LEDGERS: u32 = 518_400;
const SESSION_TTL_LEDGERS: u32 = 172_800;

#[contract]
pub struct ConnectFourContract;

#[contractimpl]
impl ConnectFourContract {
  pub fn __constructor(env: Env, admin: Address) {
    env.storage().instance().set(&DataKey::Admin, &admin);
    env.storage().instance().set(&DataKey::TotalGames, &0u64);
  }

  // --- session keys ---

  pub fn register_session_key(
    env: Env,
    owner: Address,
    session_key: Address,
    expiry_time: u64,
  ) -> Result<(), Error> {
    owner.require_auth();

    if session_key == owner { return Err(Error::SelfDelegation); }
    let now = env.ledger().timestamp();
    if expiry_time <= now { return Err(Error::InvalidSessionExpiry); }
    if expiry_time > now.saturating_add(MAX_SESSION_KEY_TTL) {
      return Err(Error::InvalidSessionExpiry);
    }

    let record = SessionKeyRecord { owner: owner.clone(), expiry_time, is_active: true };
    let key = DataKey::Session(session_key.clone());
    env.storage().persistent().set(&key, &record);
    extend_session_ttl(&env, &key);

    env.events().publish((symbol_short!("sk_reg"), session_key), (owner, expiry_time));
    Ok(())
  }

  pub fn revoke_session_key(env: Env, owner: Address, session_key: Address) -> Result<(), Error> {
    owner.require_auth();

    let key = DataKey::Session(session_key.clone());
    let mut record: SessionKeyRecord =
      env.storage().persistent().get(&key).ok_or(Error::SessionKeyNotFound)?;
    if record.owner != owner { return Err(Error::NotSessionOwner); }

    record.is_active = false;
    env.storage().persistent().set(&key, &record);
    extend_session_ttl(&env, &key);

    env.events().publish((symbol_short!("sk_rev"), session_key), owner);
    Ok(())
  }

  pub fn get_session_key(env: Env, session_key: Address) -> Option<SessionKeyRecord> {
    env.storage().persistent().get(&DataKey::Session(session_key))
  }

  pub fn batch_check_session_keys(env: Env, session_keys: Vec<Address>) -> Vec<bool> {
    let now = env.ledger().timestamp();
    let mut results = Vec::new(&env);
    for session_key in session_keys.iter() {
      let active = match env
        .storage()
        .persistent()
        .get::<DataKey, SessionKeyRecord>(&DataKey::Session(session_key))
      {
        Some(record) => record.is_active && now < record.expiry_time,
        None => false,
      };
      results.push_back(active);
    }
    results
  }

  // --- lifecycle ---

  pub fn create_game(env: Env, caller: Address, room_id: String) -> Result<u64, Error> {
    caller.require_auth();
    let actor = resolve_actor(&env, &caller)?;

    if room_id.len() == 0 || room_id.len() > MAX_ROOM_ID_LEN {
      return Err(Error::InvalidRoomId);
    }
    let room_key = DataKey::Room(room_id.clone());
    if env.storage().persistent().has(&room_key) { return Err(Error::RoomTaken); }
    if env.storage().persistent().has(&DataKey::ActiveGame(actor.clone())) {
      return Err(Error::AlreadyInGame);
    }

    let total: u64 = env.storage().instance().get(&DataKey::TotalGames).unwrap_or(0);
    let game_id = total.saturating_add(1);
    env.storage().instance().set(&DataKey::TotalGames, &game_id);

    let mut board = Vec::new(&env);
    for _ in 0..BOARD_CELLS {
      board.push_back(Cell::Empty);
    }

    let game = Game {
      id: game_id,
      player1: actor.clone(),
      player2: None,
      board,
      current_player: actor.clone(),
      status: GameStatus::WaitingForPlayer,
      winner: None,
      created_at: env.ledger().timestamp(),
      started_at: 0,
      last_move_at: 0,
      room_id: room_id.clone(),
      move_count: 0,
    };

    save_game(&env, &game);
    env.storage().persistent().set(&room_key, &game_id);
    extend_game_ttl(&env, &room_key);
    let seat_key = DataKey::ActiveGame(actor.clone());
    env.storage().persistent().set(&seat_key, &game_id);
    extend_game_ttl(&env, &seat_key);

    env.events().publish((symbol_short!("created"), game_id), (actor, room_id));
    Ok(game_id)
  }

  pub fn join_game(env: Env, caller: Address, room_id: String) -> Result<(), Error> {
    caller.require_auth();
    let actor = resolve_actor(&env, &caller)?;

    let game_id: u64 = env
      .storage()
      .persistent()
      .get(&DataKey::Room(room_id))
      .ok_or(Error::RoomNotFound)?;
    let mut game = load_game(&env, game_id)?;

    if game.status != GameStatus::WaitingForPlayer { return Err(Error::GameNotWaiting); }
    if actor == game.player1 { return Err(Error::CannotPlaySelf); }
    if env.storage().persistent().has(&DataKey::ActiveGame(actor.clone())) {
      return Err(Error::AlreadyInGame);
    }

    let now = env.ledger().timestamp();
    game.player2 = Some(actor.clone());
    game.status = GameStatus::InProgress;
    game.started_at = now;
    game.last_move_at = now;

    save_game(&env, &game);
    let seat_key = DataKey::ActiveGame(actor.clone());
    env.storage().persistent().set(&seat_key, &game_id);
    extend_game_ttl(&env, &seat_key);

    env.events().publish((symbol_short!("joined"), game_id), actor);
    env
      .events()
      .publish((symbol_short!("started"), game_id), (game.player1.clone(), game.player2.clone()));
    Ok(())
  }

  pub fn leave_game(env: Env, caller: Address, game_id: u64) -> Result<(), Error> {
    caller.require_auth();
    let actor = resolve_actor(&env, &caller)?;
    let mut game = load_game(&env, game_id)?;

    if game.status != GameStatus::WaitingForPlayer { return Err(Error::GameNotWaiting); }
    if actor != game.player1 { return Err(Error::NotPlayer); }

    abandon_game(&env, &mut game, Symbol::new(&env, "player_left"));
    save_game(&env, &game);
    Ok(())
  }

  pub fn forfeit_game(env: Env, caller: Address, game_id: u64) -> Result<(), Error> {
    caller.require_auth();
    let actor = resolve_actor(&env, &caller)?;
    let mut game = load_game(&env, game_id)?;

    if game.status != GameStatus::InProgress { return Err(Error::GameNotInProgress); }
    if !is_seated(&game, &actor) { return Err(Error::NotPlayer); }

    let winner = opponent_of(&game, &actor)?;
    finish_game(&env, &mut game, Some(winner), symbol_short!("forfeit"), None);
    save_game(&env, &game);
    Ok(())
  }

  /// Permissionless watcher hook. Resolves a stuck game if either deadline
  /// has passed; otherwise does nothing.
  pub fn check_game_timeout(env: Env, game_id: u64) -> Result<(), Error> {
    let mut game = load_game(&env, game_id)?;
    let now = env.ledger().timestamp();

    match game.status {
      GameStatus::InProgress => {
        if now.saturating_sub(game.last_move_at) > MOVE_TIMEOUT {
          // The player on the clock failed to move; the waiting player wins.
          let on_clock = game.current_player.clone();
          let winner = opponent_of(&game, &on_clock)?;
          finish_game(&env, &mut game, Some(winner), symbol_short!("timeout"), None);
          save_game(&env, &game);
        } else if now.saturating_sub(game.started_at) > GAME_TIMEOUT {
          abandon_game(&env, &mut game, Symbol::new(&env, "game_timeout"));
          save_game(&env, &game);
        }
      }
      GameStatus::WaitingForPlayer => {
        if now.saturating_sub(game.created_at) > GAME_TIMEOUT {
          abandon_game(&env, &mut game, Symbol::new(&env, "waiting_timeout"));
          save_game(&env, &game);
        }
      }
      GameStatus::Finished | GameStatus::Abandoned => {}
    }
    Ok(())
  }

  pub fn cleanup_abandoned_game(env: Env, game_id: u64) -> Result<(), Error> {
    let admin: Address = env.storage().instance().get(&DataKey::Admin).expect("Admin not set");
    admin.require_auth();

    let mut game = load_game(&env, game_id)?;
    let now = env.ledger().timestamp();

    let stale = match game.status {
      GameStatus::WaitingForPlayer => now.saturating_sub(game.created_at) > GAME_TIMEOUT,
      GameStatus::InProgress => {
        now.saturating_sub(game.last_move_at) > MOVE_TIMEOUT.saturating_mul(2)
      }
      GameStatus::Finished | GameStatus::Abandoned => false,
    };
    if !stale { return Err(Error::GameNotStale); }

    abandon_game(&env, &mut game, Symbol::new(&env, "admin_cleanup"));
    save_game(&env, &game);
    Ok(())
  }

  // --- moves ---

  pub fn make_move(env: Env, caller: Address, game_id: u64, column: u32) -> Result<(), Error> {
    caller.require_auth();
    let actor = resolve_actor(&env, &caller)?;
    let mut game = load_game(&env, game_id)?;

    if game.status != GameStatus::InProgress { return Err(Error::GameNotInProgress); }
    if !is_seated(&game, &actor) { return Err(Error::NotPlayer); }
    if actor != game.current_player { return Err(Error::NotYourTurn); }
    if column >= COLS { return Err(Error::InvalidColumn); }

    let now = env.ledger().timestamp();
    if now.saturating_sub(game.last_move_at) > MOVE_TIMEOUT {
      // Stale move: the attempted move is discarded and the game resolves
      // against the mover instead of rejecting outright.
      let winner = opponent_of(&game, &actor)?;
      finish_game(&env, &mut game, Some(winner), symbol_short!("timeout"), None);
      save_game(&env, &game);
      return Ok(());
    }

    let row = drop_row(&game.board, column).ok_or(Error::ColumnFull)?;
    let marker = if actor == game.player1 { Cell::Player1 } else { Cell::Player2 };
    game.board.set(row.saturating_mul(COLS).saturating_add(column), marker);
    game.move_count = game.move_count.saturating_add(1);
    game.last_move_at = now;

    let moves_key = DataKey::Moves(game_id);
    let mut moves: Vec<GameMove> =
      env.storage().persistent().get(&moves_key).unwrap_or_else(|| Vec::new(&env));
    moves.push_back(GameMove { game_id, player: actor.clone(), column, row, timestamp: now });
    env.storage().persistent().set(&moves_key, &moves);
    extend_game_ttl(&env, &moves_key);

    env
      .events()
      .publish((symbol_short!("move"), game_id), (actor.clone(), column, row));

    if let Some(winning_line) = find_winning_line(&game.board, row, column, marker) {
      finish_game(&env, &mut game, Some(actor), symbol_short!("win"), Some(winning_line));
    } else if game.move_count >= BOARD_CELLS {
      finish_game(&env, &mut game, None, symbol_short!("draw"), None);
    } else {
      game.current_player = opponent_of(&game, &actor)?;
    }

    save_game(&env, &game);
    Ok(())
  }

  // --- reads ---

  pub fn get_game(env: Env, game_id: u64) -> Result<Game, Error> {
    load_game(&env, game_id)
  }

  pub fn get_game_by_room(env: Env, room_id: String) -> Result<Game, Error> {
    let game_id: u64 = env
      .storage()
      .persistent()
      .get(&DataKey::Room(room_id))
      .ok_or(Error::RoomNotFound)?;
    load_game(&env, game_id)
  }

  pub fn get_player_active_game(env: Env, player: Address) -> Option<u64> {
    env.storage().persistent().get(&DataKey::ActiveGame(player))
  }

  pub fn get_game_moves(env: Env, game_id: u64) -> Result<Vec<GameMove>, Error> {
    load_game(&env, game_id)?;
    Ok(env
      .storage()
      .persistent()
      .get(&DataKey::Moves(game_id))
      .unwrap_or_else(|| Vec::new(&env)))
  }

  pub fn get_board(env: Env, game_id: u64) -> Result<Vec<Cell>, Error> {
    Ok(load_game(&env, game_id)?.board)
  }

  pub fn is_column_full(env: Env, game_id: u64, column: u32) -> Result<bool, Error> {
    if column >= COLS { return Err(Error::InvalidColumn); }
    let game = load_game(&env, game_id)?;
    Ok(drop_row(&game.board, column).is_none())
  }

  /// Seconds until the deadline that currently applies: the move deadline
  /// while in progress, the join deadline while waiting, zero once terminal.
  pub fn get_time_remaining(env: Env, game_id: u64) -> Result<u64, Error> {
    let game = load_game(&env, game_id)?;
    let now = env.ledger().timestamp();
    let remaining = match game.status {
      GameStatus::InProgress => {
        game.last_move_at.saturating_add(MOVE_TIMEOUT).saturating_sub(now)
      }
      GameStatus::WaitingForPlayer => {
        game.created_at.saturating_add(GAME_TIMEOUT).saturating_sub(now)
      }
      GameStatus::Finished | GameStatus::Abandoned => 0,
    };
    Ok(remaining)
  }

  pub fn get_total_games(env: Env) -> u64 {
    env.storage().instance().get(&DataKey::TotalGames).unwrap_or(0)
  }

  // --- admin ---

  pub fn get_admin(env: Env) -> Address {
    env.storage().instance().get(&DataKey::Admin).expect("Admin not set")
  }

  pub fn set_admin(env: Env, new_admin: Address) {
    let admin: Address = env.storage().instance().get(&DataKey::Admin).expect("Admin not set");
    admin.require_auth();
    env.storage().instance().set(&DataKey::Admin, &new_admin);
  }

  pub fn upgrade(env: Env, new_wasm_hash: BytesN<32>) {
    let admin: Address = env.storage().instance().get(&DataKey::Admin).expect("Admin not set");
    admin.require_auth();
    env.deployer().update_current_contract_wasm(new_wasm_hash);
  }
}

/// Maps an authenticated caller to the identity it acts for. A caller with a
/// live session-key record acts as the record's owner; a caller whose record
/// was revoked or has expired is refused; anyone else acts as themselves.
fn resolve_actor(env: &Env, caller: &Address) -> Result<Address, Error> {
  match env
    .storage()
    .persistent()
    .get::<DataKey, SessionKeyRecord>(&DataKey::Session(caller.clone()))
  {
    Some(record) => {
      if !record.is_active { return Err(Error::SessionKeyNotActive); }
      if env.ledger().timestamp() >= record.expiry_time {
        return Err(Error::SessionKeyExpired);
      }
      Ok(record.owner)
    }
    None => Ok(caller.clone()),
  }
}

fn load_game(env: &Env, game_id: u64) -> Result<Game, Error> {
  env.storage().persistent().get(&DataKey::Game(game_id)).ok_or(Error::GameNotFound)
}

fn save_game(env: &Env, game: &Game) {
  let key = DataKey::Game(game.id);
  env.storage().persistent().set(&key, game);
  extend_game_ttl(env, &key);
}

fn is_seated(game: &Game, player: &Address) -> bool {
  *player == game.player1 || game.player2 == Some(player.clone())
}

fn opponent_of(game: &Game, player: &Address) -> Result<Address, Error> {
  let player2 = game.player2.clone().ok_or(Error::GameNotInProgress)?;
  if *player == game.player1 { Ok(player2) } else { Ok(game.player1.clone()) }
}

/// Terminal transition shared by the win, draw, forfeit and move-timeout
/// paths. Releases the room and seat indexes so both can be reused.
fn finish_game(
  env: &Env,
  game: &mut Game,
  winner: Option<Address>,
  reason: Symbol,
  winning_line: Option<WinningLine>,
) {
  game.status = GameStatus::Finished;
  game.winner = winner.clone();
  release_indexes(env, game);
  env
    .events()
    .publish((symbol_short!("finished"), game.id), (winner, reason, winning_line));
}

fn abandon_game(env: &Env, game: &mut Game, reason: Symbol) {
  game.status = GameStatus::Abandoned;
  release_indexes(env, game);
  env.events().publish((symbol_short!("abandoned"), game.id), reason);
}

fn release_indexes(env: &Env, game: &Game) {
  env.storage().persistent().remove(&DataKey::Room(game.room_id.clone()));
  env.storage().persistent().remove(&DataKey::ActiveGame(game.player1.clone()));
  if let Some(player2) = game.player2.clone() {
    env.storage().persistent().remove(&DataKey::ActiveGame(player2));
  }
}

/// Lowest empty row in `column`, scanning from the bottom. None when full.
fn drop_row(board: &Vec<Cell>, column: u32) -> Option<u32> {
  let mut row = ROWS;
  while row > 0 {
    row -= 1;
    if cell_at(board, row as i32, column as i32) == Cell::Empty {
      return Some(row);
    }
  }
  None
}

fn cell_at(board: &Vec<Cell>, row: i32, col: i32) -> Cell {
  if row < 0 || row >= ROWS as i32 || col < 0 || col >= COLS as i32 {
    return Cell::Empty;
  }
  board
    .get((row as u32).saturating_mul(COLS).saturating_add(col as u32))
    .unwrap_or(Cell::Empty)
}

fn run_matches(board: &Vec<Cell>, row: i32, col: i32, dr: i32, dc: i32, marker: Cell) -> bool {
  let mut step = 0;
  while step < 4 {
    if cell_at(board, row + dr * step, col + dc * step) != marker {
      return false;
    }
    step += 1;
  }
  true
}

/// Checks only the four line directions through the cell just placed at
/// (`row`, `col`). Every length-4 window containing that cell is tested;
/// vertically only the window extending below the placed cell can exist,
/// since the cells above it are still empty.
fn find_winning_line(board: &Vec<Cell>, row: u32, col: u32, marker: Cell) -> Option<WinningLine> {
  let r = row as i32;
  let c = col as i32;

  // horizontal
  for shift in 0..4 {
    let c0 = c - shift;
    if run_matches(board, r, c0, 0, 1, marker) {
      return Some(line(r, c0, r, c0 + 3));
    }
  }

  // vertical: the placed cell plus the three directly below
  if run_matches(board, r, c, 1, 0, marker) {
    return Some(line(r, c, r + 3, c));
  }

  // diagonal, down-right
  for shift in 0..4 {
    let r0 = r - shift;
    let c0 = c - shift;
    if run_matches(board, r0, c0, 1, 1, marker) {
      return Some(line(r0, c0, r0 + 3, c0 + 3));
    }
  }

  // diagonal, up-right
  for shift in 0..4 {
    let r0 = r + shift;
    let c0 = c - shift;
    if run_matches(board, r0, c0, -1, 1, marker) {
      return Some(line(r0, c0, r0 - 3, c0 + 3));
    }
  }

  None
}

fn line(start_row: i32, start_col: i32, end_row: i32, end_col: i32) -> WinningLine {
  WinningLine {
    start_row: start_row as u32,
    start_col: start_col as u32,
    end_row: end_row as u32,
    end_col: end_col as u32,
  }
}

fn extend_game_ttl(env: &Env, key: &DataKey) {
  env.storage().persistent().extend_ttl(key, GAME_TTL_LEDGERS, GAME_TTL_LEDGERS);
}

fn extend_session_ttl(env: &Env, key: &DataKey) {
  env.storage().persistent().extend_ttl(key, SESSION_TTL_LEDGERS, SESSION_TTL_LEDGERS);
}
