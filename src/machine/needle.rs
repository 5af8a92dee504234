//! Needle addresses on a V-bed machine
//!
//! A needle is identified by its bed, its position, and whether it is the
//! slider at that position. Sliders share positions with the main needles
//! and can only hold transferred loops.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two opposing needle beds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bed {
    Front,
    Back,
}

impl Bed {
    pub fn opposite(self) -> Bed {
        match self {
            Bed::Front => Bed::Back,
            Bed::Back => Bed::Front,
        }
    }

    pub fn is_front(self) -> bool {
        matches!(self, Bed::Front)
    }

    /// Knitout prefix character
    pub fn prefix(self) -> char {
        match self {
            Bed::Front => 'f',
            Bed::Back => 'b',
        }
    }
}

impl fmt::Display for Bed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bed::Front => write!(f, "Front"),
            Bed::Back => write!(f, "Back"),
        }
    }
}

/// Direction of a carriage pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassDirection {
    Leftward,
    Rightward,
}

impl PassDirection {
    pub fn opposite(self) -> PassDirection {
        match self {
            PassDirection::Leftward => PassDirection::Rightward,
            PassDirection::Rightward => PassDirection::Leftward,
        }
    }

    /// Knitout direction symbol
    pub fn symbol(self) -> char {
        match self {
            PassDirection::Leftward => '-',
            PassDirection::Rightward => '+',
        }
    }
}

impl fmt::Display for PassDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassDirection::Leftward => write!(f, "Leftward"),
            PassDirection::Rightward => write!(f, "Rightward"),
        }
    }
}

/// Address of a needle or slider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Needle {
    pub bed: Bed,
    pub position: i64,
    pub is_slider: bool,
}

impl Needle {
    pub fn new(bed: Bed, position: i64, is_slider: bool) -> Self {
        Self {
            bed,
            position,
            is_slider,
        }
    }

    pub fn front(position: i64) -> Self {
        Self::new(Bed::Front, position, false)
    }

    pub fn back(position: i64) -> Self {
        Self::new(Bed::Back, position, false)
    }

    pub fn front_slider(position: i64) -> Self {
        Self::new(Bed::Front, position, true)
    }

    pub fn back_slider(position: i64) -> Self {
        Self::new(Bed::Back, position, true)
    }

    pub fn is_front(&self) -> bool {
        self.bed.is_front()
    }

    pub fn is_back(&self) -> bool {
        !self.bed.is_front()
    }

    /// The main needle at this address
    pub fn main_needle(self) -> Needle {
        Needle::new(self.bed, self.position, false)
    }

    /// The slider at this address
    pub fn slider_needle(self) -> Needle {
        Needle::new(self.bed, self.position, true)
    }

    /// The main needle at the same position on the other bed
    pub fn opposite(self) -> Needle {
        Needle::new(self.bed.opposite(), self.position, false)
    }

    /// Move along the bed by `offset` positions
    pub fn offset(self, offset: i64) -> Needle {
        Needle::new(self.bed, self.position + offset, self.is_slider)
    }

    /// Same bed and position, ignoring slider vs. main
    pub fn same_address(&self, other: &Needle) -> bool {
        self.bed == other.bed && self.position == other.position
    }

    /// Position of this needle measured along the front bed
    ///
    /// Racking is `front - back`, so a back needle at `p` sits across from
    /// front position `p + racking`.
    pub fn racked_position_on_front(&self, racking: f64) -> f64 {
        match self.bed {
            Bed::Front => self.position as f64,
            Bed::Back => self.position as f64 + racking,
        }
    }

    /// The needle on the opposite bed aligned with this one at an integral racking
    pub fn aligned_needle(&self, racking: i64, to_slider: bool) -> Needle {
        let position = match self.bed {
            Bed::Front => self.position - racking,
            Bed::Back => self.position + racking,
        };
        Needle::new(self.bed.opposite(), position, to_slider)
    }

    /// Parse knitout needle notation such as `f12` or `bs3`
    pub fn parse(text: &str) -> Option<Needle> {
        let mut chars = text.chars();
        let bed = match chars.next()? {
            'f' => Bed::Front,
            'b' => Bed::Back,
            _ => return None,
        };
        let rest = chars.as_str();
        let (is_slider, digits) = match rest.strip_prefix('s') {
            Some(digits) => (true, digits),
            None => (false, rest),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let position = digits.parse().ok()?;
        Some(Needle::new(bed, position, is_slider))
    }
}

impl fmt::Display for Needle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.bed.prefix(),
            if self.is_slider { "s" } else { "" },
            self.position
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!(Needle::parse("f12"), Some(Needle::front(12)));
        assert_eq!(Needle::parse("bs3"), Some(Needle::back_slider(3)));
        assert_eq!(Needle::parse("x3"), None);
        assert_eq!(Needle::parse("fs"), None);
        assert_eq!(Needle::back_slider(7).to_string(), "bs7");
        assert_eq!(Needle::front(0).to_string(), "f0");
    }

    #[test]
    fn test_racked_position() {
        assert_eq!(Needle::front(4).racked_position_on_front(2.0), 4.0);
        assert_eq!(Needle::back(4).racked_position_on_front(2.0), 6.0);
        assert_eq!(Needle::back(4).racked_position_on_front(-1.0), 3.0);
    }

    #[test]
    fn test_aligned_needle() {
        // racking = front - back
        assert_eq!(Needle::front(2).aligned_needle(-2, false), Needle::back(4));
        assert_eq!(Needle::back(4).aligned_needle(-2, false), Needle::front(2));
        assert_eq!(Needle::front(3).aligned_needle(0, true), Needle::back_slider(3));
    }

    #[test]
    fn test_same_address_ignores_slider() {
        assert!(Needle::front(1).same_address(&Needle::front_slider(1)));
        assert!(!Needle::front(1).same_address(&Needle::back(1)));
    }
}
