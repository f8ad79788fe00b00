use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::tracker::{DeltaAccumulator, MouseSample, WheelDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    DownLeft,
    UpRight,
    DownRight,
}

impl Direction {
    pub fn symbol(self) -> &'static str {
        match self {
            Direction::Up => "U",
            Direction::Down => "D",
            Direction::Left => "L",
            Direction::Right => "R",
            Direction::UpLeft => "Lu",
            Direction::DownLeft => "Ld",
            Direction::UpRight => "Ru",
            Direction::DownRight => "Rd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureStyle {
    #[default]
    Cardinal,
    Intercardinal45,
    Intercardinal60,
}

impl GestureStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            GestureStyle::Cardinal => "cardinal",
            GestureStyle::Intercardinal45 => "intercardinal45",
            GestureStyle::Intercardinal60 => "intercardinal60",
        }
    }

    pub fn classifier(self) -> Box<dyn DirectionClassifier + Send> {
        match self {
            GestureStyle::Cardinal => Box::new(Cardinal),
            GestureStyle::Intercardinal45 => Box::new(Intercardinal45),
            GestureStyle::Intercardinal60 => Box::new(Intercardinal60),
        }
    }
}

impl FromStr for GestureStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cardinal" => Ok(GestureStyle::Cardinal),
            "intercardinal45" => Ok(GestureStyle::Intercardinal45),
            "intercardinal60" => Ok(GestureStyle::Intercardinal60),
            other => Err(anyhow!("unknown gesture style: {other}")),
        }
    }
}

pub trait DirectionClassifier {
    /// `None` only for the zero vector.
    fn classify(&self, dx: f64, dy: f64) -> Option<Direction>;
}

/// Four-way: the dominant axis wins, ties go horizontal.
#[derive(Debug, Clone, Copy)]
pub struct Cardinal;

impl DirectionClassifier for Cardinal {
    fn classify(&self, dx: f64, dy: f64) -> Option<Direction> {
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        let vertical = if dy > 0.0 {
            Direction::Down
        } else {
            Direction::Up
        };
        let horizontal = if dx > 0.0 {
            Direction::Right
        } else {
            Direction::Left
        };
        Some(if dx.abs() >= dy.abs() {
            horizontal
        } else {
            vertical
        })
    }
}

// Sector tables: (exclusive upper bound in degrees, direction), angle in [0, 360)
// measured clockwise on screen from +x because y grows downwards.
const SECTORS_45: [(f64, Direction); 9] = [
    (22.5, Direction::Right),
    (67.5, Direction::DownRight),
    (112.5, Direction::Down),
    (157.5, Direction::DownLeft),
    (202.5, Direction::Left),
    (247.5, Direction::UpLeft),
    (292.5, Direction::Up),
    (337.5, Direction::UpRight),
    (360.0, Direction::Right),
];

const SECTORS_60: [(f64, Direction); 9] = [
    (15.0, Direction::Right),
    (75.0, Direction::DownRight),
    (105.0, Direction::Down),
    (165.0, Direction::DownLeft),
    (195.0, Direction::Left),
    (255.0, Direction::UpLeft),
    (285.0, Direction::Up),
    (345.0, Direction::UpRight),
    (360.0, Direction::Right),
];

fn angle_of(dx: f64, dy: f64) -> f64 {
    let deg = dy.atan2(dx).to_degrees();
    if deg < 0.0 { deg + 360.0 } else { deg }
}

fn bucket(table: &[(f64, Direction)], angle: f64) -> Direction {
    table
        .iter()
        .find(|(hi, _)| angle < *hi)
        .map(|(_, d)| *d)
        // 360.0 after rounding is the same ray as 0.0
        .unwrap_or(Direction::Right)
}

/// Eight equal 45° sectors.
#[derive(Debug, Clone, Copy)]
pub struct Intercardinal45;

impl Intercardinal45 {
    pub fn direction_at(angle: f64) -> Direction {
        bucket(&SECTORS_45, angle)
    }
}

impl DirectionClassifier for Intercardinal45 {
    fn classify(&self, dx: f64, dy: f64) -> Option<Direction> {
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        Some(Self::direction_at(angle_of(dx, dy)))
    }
}

/// 30° cardinal sectors, 60° diagonal sectors.
#[derive(Debug, Clone, Copy)]
pub struct Intercardinal60;

impl Intercardinal60 {
    pub fn direction_at(angle: f64) -> Direction {
        bucket(&SECTORS_60, angle)
    }
}

impl DirectionClassifier for Intercardinal60 {
    fn classify(&self, dx: f64, dy: f64) -> Option<Direction> {
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        Some(Self::direction_at(angle_of(dx, dy)))
    }
}

/// Common surface of the two recognizer policies.
pub trait Recognizer {
    fn reset(&mut self, origin: &MouseSample);
    /// Returns whether the gesture string changed.
    fn add_point(&mut self, sample: &MouseSample) -> bool;
    fn current_gesture(&self) -> String;
}

fn render(symbols: &[Direction]) -> String {
    symbols.iter().map(|d| d.symbol()).collect()
}

/// Outcome of one throttled sample.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    /// The cumulative sample that crossed the fidelity threshold.
    pub sample: MouseSample,
    pub appended: bool,
}

/// Two-consecutive-moves recognizer: a direction is committed once two
/// throttled samples in a row agree, and never twice in a row.
pub struct GestureRecognizer {
    classifier: Box<dyn DirectionClassifier + Send>,
    accumulator: DeltaAccumulator,
    fidelity: f64,
    symbols: Vec<Direction>,
    last_appended: Option<Direction>,
    previous: Option<Direction>,
    origin: (f64, f64),
}

impl GestureRecognizer {
    pub fn new(style: GestureStyle, fidelity: f64) -> Self {
        Self {
            classifier: style.classifier(),
            accumulator: DeltaAccumulator::new(),
            fidelity,
            symbols: Vec::new(),
            last_appended: None,
            previous: None,
            origin: (0.0, 0.0),
        }
    }

    pub fn origin(&self) -> (f64, f64) {
        self.origin
    }

    /// Like `add_point`, but reports the throttled sample when one got through.
    pub fn step(&mut self, sample: &MouseSample) -> Option<Step> {
        let acc = self.accumulator.throttle(sample, self.fidelity)?;
        let direction = self.classifier.classify(acc.dx, acc.dy);
        let appended = match direction {
            Some(dir) => {
                let commit = self.previous == Some(dir) && self.last_appended != Some(dir);
                if commit {
                    self.symbols.push(dir);
                    self.last_appended = Some(dir);
                }
                self.previous = Some(dir);
                commit
            }
            None => false,
        };
        Some(Step {
            sample: acc,
            appended,
        })
    }
}

impl Recognizer for GestureRecognizer {
    fn reset(&mut self, origin: &MouseSample) {
        self.accumulator.reset();
        self.symbols.clear();
        self.last_appended = None;
        self.previous = None;
        self.origin = (origin.x, origin.y);
    }

    fn add_point(&mut self, sample: &MouseSample) -> bool {
        self.step(sample).is_some_and(|s| s.appended)
    }

    fn current_gesture(&self) -> String {
        render(&self.symbols)
    }
}

/// Looser four-way recognizer used for gesture entry widgets: appends
/// whenever the direction differs from the previous sample's.
#[derive(Debug, Default)]
pub struct UdlrRecognizer {
    accumulator: DeltaAccumulator,
    fidelity: f64,
    symbols: Vec<Direction>,
    previous: Option<Direction>,
}

impl UdlrRecognizer {
    pub fn new(fidelity: f64) -> Self {
        Self {
            fidelity,
            ..Self::default()
        }
    }
}

impl Recognizer for UdlrRecognizer {
    fn reset(&mut self, _origin: &MouseSample) {
        self.accumulator.reset();
        self.symbols.clear();
        self.previous = None;
    }

    fn add_point(&mut self, sample: &MouseSample) -> bool {
        let Some(acc) = self.accumulator.throttle(sample, self.fidelity) else {
            return false;
        };
        let Some(dir) = Cardinal.classify(acc.dx, acc.dy) else {
            return false;
        };
        let changed = self.previous != Some(dir);
        if changed {
            self.symbols.push(dir);
        }
        self.previous = Some(dir);
        changed
    }

    fn current_gesture(&self) -> String {
        render(&self.symbols)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WheelDirection {
    Up,
    Down,
    Left,
    Right,
}

impl WheelDirection {
    /// Vertical axis is checked first.
    pub fn classify(wheel: &WheelDelta) -> Option<Self> {
        if wheel.y < 0.0 {
            Some(WheelDirection::Up)
        } else if wheel.y > 0.0 {
            Some(WheelDirection::Down)
        } else if wheel.x < 0.0 {
            Some(WheelDirection::Left)
        } else if wheel.x > 0.0 {
            Some(WheelDirection::Right)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WheelDirection::Up => "up",
            WheelDirection::Down => "down",
            WheelDirection::Left => "left",
            WheelDirection::Right => "right",
        }
    }

    pub fn all() -> [WheelDirection; 4] {
        [
            WheelDirection::Up,
            WheelDirection::Down,
            WheelDirection::Left,
            WheelDirection::Right,
        ]
    }
}

impl fmt::Display for WheelDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Buttons pressed while the gesture button is held, gesture button first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chord {
    buttons: Vec<u8>,
}

impl Chord {
    pub fn start(gesture_button: u8) -> Self {
        Self {
            buttons: vec![gesture_button],
        }
    }

    pub fn from_buttons(buttons: Vec<u8>) -> Self {
        Self { buttons }
    }

    pub fn press(&mut self, button: u8) {
        self.buttons.push(button);
    }

    pub fn buttons(&self) -> &[u8] {
        &self.buttons
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.len() < 2
    }

    pub fn to_gesture(&self) -> String {
        self.buttons
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join("-")
    }
}
