//! Reversi rules engine
//!
//! Pure rules logic over an 8x8 board: legal-move detection, disc flipping,
//! the turn/pass/termination policy and outcome scoring. Nothing in here is
//! shared between threads; callers serialize access to a game themselves.

use std::fmt;
use thiserror::Error;

/// Width and height of the board
pub const BOARD_SIZE: usize = 8;

/// Points for the player holding the majority of discs (or the forfeit winner)
pub const WIN_POINTS: i64 = 3;
/// Points for the player holding the minority of discs (or the forfeiting player)
pub const LOSS_POINTS: i64 = 1;
/// Points awarded to both players when disc counts are equal
pub const DRAW_POINTS: i64 = 2;

const DIRECTIONS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// One of the two colors. Black always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Black,
    White,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::Black => Side::White,
            Side::White => Side::Black,
        }
    }

    /// Glyph used for this side's discs in the rendered board
    pub fn glyph(self) -> char {
        match self {
            Side::Black => 'B',
            Side::White => 'W',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Side::Black => "black",
            Side::White => "white",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Content of a single board square
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Black,
    White,
}

impl Cell {
    /// The side owning the disc on this cell, if any
    pub fn side(self) -> Option<Side> {
        match self {
            Cell::Empty => None,
            Cell::Black => Some(Side::Black),
            Cell::White => Some(Side::White),
        }
    }

    pub fn glyph(self) -> char {
        match self.side() {
            Some(side) => side.glyph(),
            None => '.',
        }
    }
}

impl From<Side> for Cell {
    fn from(side: Side) -> Self {
        match side {
            Side::Black => Cell::Black,
            Side::White => Cell::White,
        }
    }
}

/// Fixed 8x8 grid of cells, indexed as `(row, col)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

impl Board {
    /// Board with no discs at all
    pub fn empty() -> Self {
        Self {
            cells: [[Cell::Empty; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    /// Standard opening position: white on the (3,3)-(4,4) diagonal,
    /// black on the (3,4)-(4,3) diagonal
    pub fn initial() -> Self {
        let mut board = Self::empty();
        board.cells[3][3] = Cell::White;
        board.cells[3][4] = Cell::Black;
        board.cells[4][3] = Cell::Black;
        board.cells[4][4] = Cell::White;
        board
    }

    /// Builds a board from eight rows of glyphs (`.`, `B`, `W`).
    ///
    /// Whitespace inside a row is ignored so fixtures can be written the same
    /// way the board is rendered. Returns None if the shape or a glyph is wrong.
    pub fn from_rows(rows: &[&str]) -> Option<Self> {
        if rows.len() != BOARD_SIZE {
            return None;
        }

        let mut board = Self::empty();
        for (row, line) in rows.iter().enumerate() {
            let glyphs: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
            if glyphs.len() != BOARD_SIZE {
                return None;
            }
            for (col, glyph) in glyphs.into_iter().enumerate() {
                board.cells[row][col] = match glyph {
                    '.' => Cell::Empty,
                    'B' => Cell::Black,
                    'W' => Cell::White,
                    _ => return None,
                };
            }
        }
        Some(board)
    }

    /// Returns the cell at `(row, col)`, or None when off the board
    pub fn get(&self, row: usize, col: usize) -> Option<Cell> {
        self.cells.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        if row < BOARD_SIZE && col < BOARD_SIZE {
            self.cells[row][col] = cell;
        }
    }

    /// Number of discs of the given side
    pub fn count(&self, side: Side) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| cell.side() == Some(side))
            .count()
    }

    /// Total number of discs of either color
    pub fn disc_count(&self) -> usize {
        self.count(Side::Black) + self.count(Side::White)
    }

    /// Opponent discs that would be flanked by placing `side` at `(row, col)`
    /// along a single direction. Empty when the run does not end on `side`.
    fn flanked_run(&self, row: usize, col: usize, side: Side, dir: (isize, isize)) -> Vec<(usize, usize)> {
        let opponent = Cell::from(side.opponent());
        let own = Cell::from(side);
        let mut run = Vec::new();
        let (mut r, mut c) = (row as isize + dir.0, col as isize + dir.1);

        while r >= 0 && c >= 0 && (r as usize) < BOARD_SIZE && (c as usize) < BOARD_SIZE {
            let cell = self.cells[r as usize][c as usize];
            if cell == opponent {
                run.push((r as usize, c as usize));
            } else if cell == own && !run.is_empty() {
                return run;
            } else {
                break;
            }
            r += dir.0;
            c += dir.1;
        }

        Vec::new()
    }

    /// Checks whether `side` may place a disc at `(row, col)`.
    ///
    /// The cell must be empty and, in at least one of the eight directions,
    /// a contiguous run of opponent discs must be closed by a disc of `side`.
    pub fn is_legal_move(&self, row: usize, col: usize, side: Side) -> bool {
        if self.get(row, col) != Some(Cell::Empty) {
            return false;
        }

        DIRECTIONS
            .iter()
            .any(|&dir| !self.flanked_run(row, col, side, dir).is_empty())
    }

    /// Places a disc for `side` and flips every flanked run.
    ///
    /// Directions whose run is not closed by a `side` disc are left untouched.
    /// Callers validate with [`Board::is_legal_move`] first. Returns the number
    /// of discs flipped.
    pub fn apply_move(&mut self, row: usize, col: usize, side: Side) -> usize {
        let flips: Vec<(usize, usize)> = DIRECTIONS
            .iter()
            .flat_map(|&dir| self.flanked_run(row, col, side, dir))
            .collect();

        self.set(row, col, Cell::from(side));
        for &(r, c) in &flips {
            self.cells[r][c] = Cell::from(side);
        }
        flips.len()
    }

    pub fn has_any_legal_move(&self, side: Side) -> bool {
        (0..BOARD_SIZE).any(|row| (0..BOARD_SIZE).any(|col| self.is_legal_move(row, col, side)))
    }

    /// Every cell where `side` may currently play, in row-major order
    pub fn legal_moves(&self, side: Side) -> Vec<(usize, usize)> {
        (0..BOARD_SIZE)
            .flat_map(|row| (0..BOARD_SIZE).map(move |col| (row, col)))
            .filter(|&(row, col)| self.is_legal_move(row, col, side))
            .collect()
    }

    /// Final disc counts for this position
    pub fn score(&self) -> FinalScore {
        FinalScore {
            black: self.count(Side::Black),
            white: self.count(Side::White),
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current board:")?;
        write!(f, " ")?;
        for col in 0..BOARD_SIZE {
            write!(f, " {}", col)?;
        }
        writeln!(f)?;
        for (row, cells) in self.cells.iter().enumerate() {
            write!(f, "{}", row)?;
            for cell in cells {
                write!(f, " {}", cell.glyph())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Points to credit to each color's owner once a game ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Awards {
    pub black: i64,
    pub white: i64,
}

impl Awards {
    /// Forfeit bypasses disc counting: the forfeiting side gets the loss
    /// points, its opponent the win points
    pub fn forfeit(loser: Side) -> Self {
        Self::with_winner(loser.opponent())
    }

    fn with_winner(winner: Side) -> Self {
        match winner {
            Side::Black => Awards {
                black: WIN_POINTS,
                white: LOSS_POINTS,
            },
            Side::White => Awards {
                black: LOSS_POINTS,
                white: WIN_POINTS,
            },
        }
    }

    pub fn for_side(&self, side: Side) -> i64 {
        match side {
            Side::Black => self.black,
            Side::White => self.white,
        }
    }
}

/// Disc counts at the end of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalScore {
    pub black: usize,
    pub white: usize,
}

impl FinalScore {
    /// The side with more discs, None on a tie
    pub fn winner(&self) -> Option<Side> {
        match self.black.cmp(&self.white) {
            std::cmp::Ordering::Greater => Some(Side::Black),
            std::cmp::Ordering::Less => Some(Side::White),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Majority 3 / minority 1, tie 2 / 2
    pub fn awards(&self) -> Awards {
        match self.winner() {
            Some(winner) => Awards::with_winner(winner),
            None => Awards {
                black: DRAW_POINTS,
                white: DRAW_POINTS,
            },
        }
    }
}

/// What happens to the turn after a successful move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The mover's opponent plays next
    Next(Side),
    /// The opponent had no legal move, so the mover plays again
    Pass { passed: Side, next: Side },
    /// Neither side can move; the game is over
    Finished(FinalScore),
}

/// Applies the turn/pass/termination policy after `mover` has played
pub fn advance_turn(board: &Board, mover: Side) -> TurnOutcome {
    let opponent = mover.opponent();
    if board.has_any_legal_move(opponent) {
        TurnOutcome::Next(opponent)
    } else if board.has_any_legal_move(mover) {
        TurnOutcome::Pass {
            passed: opponent,
            next: mover,
        }
    } else {
        TurnOutcome::Finished(board.score())
    }
}

/// Moves rejected by the rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuleViolation {
    #[error("It is not your turn!")]
    NotYourTurn,
    #[error("Invalid move at ({row}, {col})! Try again.")]
    IllegalMove { row: usize, col: usize },
    #[error("The game is already over.")]
    GameOver,
}

/// Board plus side to move; the rules state of a single match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversiGame {
    board: Board,
    turn: Side,
    finished: bool,
}

impl Default for ReversiGame {
    fn default() -> Self {
        Self::new()
    }
}

impl ReversiGame {
    pub fn new() -> Self {
        Self::from_position(Board::initial(), Side::Black)
    }

    /// Starts from an arbitrary position, mostly useful for fixtures
    pub fn from_position(board: Board, turn: Side) -> Self {
        Self {
            board,
            turn,
            finished: false,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Side to move
    pub fn turn(&self) -> Side {
        self.turn
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Ends the game without a disc count, e.g. on surrender
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Validates and applies a move for `side`, then advances the turn.
    ///
    /// The board is left unchanged when the move is rejected.
    pub fn play(&mut self, side: Side, row: usize, col: usize) -> Result<TurnOutcome, RuleViolation> {
        if self.finished {
            return Err(RuleViolation::GameOver);
        }
        if side != self.turn {
            return Err(RuleViolation::NotYourTurn);
        }
        if !self.board.is_legal_move(row, col, side) {
            return Err(RuleViolation::IllegalMove { row, col });
        }

        self.board.apply_move(row, col, side);

        let outcome = advance_turn(&self.board, side);
        match outcome {
            TurnOutcome::Next(next) | TurnOutcome::Pass { next, .. } => self.turn = next,
            TurnOutcome::Finished(_) => self.finished = true,
        }
        Ok(outcome)
    }
}
