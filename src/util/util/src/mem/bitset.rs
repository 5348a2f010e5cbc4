use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// A fixed-width 32-bit flag container. Every operation takes a *mask* rather than a bit index so
/// that several flags can be tested or toggled at once.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Default)]
pub struct BitSet32(u32);

impl Debug for BitSet32 {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		write!(f, "BitSet32({:#034b})", self.0)
	}
}

impl BitSet32 {
	pub const EMPTY: Self = Self(0);
	pub const FULL: Self = Self(u32::MAX);

	pub const fn new() -> Self {
		Self::EMPTY
	}

	pub const fn from_bits(bits: u32) -> Self {
		Self(bits)
	}

	pub const fn bit(index: u32) -> u32 {
		debug_assert!(index < 32);
		1 << index
	}

	pub const fn bits(self) -> u32 {
		self.0
	}

	pub fn set(&mut self, mask: u32) {
		self.0 |= mask;
	}

	pub fn set_to(&mut self, mask: u32, value: bool) {
		if value {
			self.set(mask);
		} else {
			self.clear(mask);
		}
	}

	pub fn clear(&mut self, mask: u32) {
		self.0 &= !mask;
	}

	pub fn clear_all(&mut self) {
		self.0 = 0;
	}

	pub fn toggle(&mut self, mask: u32) {
		self.0 ^= mask;
	}

	/// Returns `true` if *any* bit of `mask` is set.
	pub fn test(self, mask: u32) -> bool {
		self.0 & mask != 0
	}

	/// Returns `true` if *every* bit of `mask` is set.
	pub fn test_strict(self, mask: u32) -> bool {
		mask != 0 && self.0 & mask == mask
	}

	pub fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub fn count_ones(self) -> u32 {
		self.0.count_ones()
	}

	pub fn iter_ones(self) -> BitSet32Iter {
		BitSet32Iter { curr: self.0 }
	}
}

impl From<u32> for BitSet32 {
	fn from(bits: u32) -> Self {
		Self(bits)
	}
}

impl BitAnd for BitSet32 {
	type Output = Self;

	fn bitand(self, rhs: Self) -> Self::Output {
		Self(self.0 & rhs.0)
	}
}

impl BitAndAssign for BitSet32 {
	fn bitand_assign(&mut self, rhs: Self) {
		self.0 &= rhs.0;
	}
}

impl BitOr for BitSet32 {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self::Output {
		Self(self.0 | rhs.0)
	}
}

impl BitOrAssign for BitSet32 {
	fn bitor_assign(&mut self, rhs: Self) {
		self.0 |= rhs.0;
	}
}

impl Not for BitSet32 {
	type Output = Self;

	fn not(self) -> Self::Output {
		Self(!self.0)
	}
}

/// Iterates over the indices of the set bits, lowest first.
#[derive(Debug, Clone)]
pub struct BitSet32Iter {
	curr: u32,
}

impl Iterator for BitSet32Iter {
	type Item = u32;

	fn next(&mut self) -> Option<Self::Item> {
		if self.curr == 0 {
			return None;
		}

		let index = self.curr.trailing_zeros();
		self.curr &= self.curr - 1;
		Some(index)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_vs_test_strict() {
		let mut set = BitSet32::new();
		set.set(0b0101);

		assert!(set.test(0b0110));
		assert!(!set.test_strict(0b0110));
		assert!(set.test_strict(0b0101));
		assert!(!set.test_strict(0));

		set.toggle(0b0011);
		assert_eq!(set.bits(), 0b0110);

		set.set_to(0b0100, false);
		assert_eq!(set.bits(), 0b0010);

		set.clear_all();
		assert!(set.is_empty());
	}

	#[test]
	fn iterates_ones() {
		let set = BitSet32::from_bits(0b1001_0010);
		assert_eq!(set.iter_ones().collect::<Vec<_>>(), vec![1, 4, 7]);
		assert_eq!(set.count_ones(), 3);
	}
}
