// MiniVM: minimal register-based virtual machine & assembler.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2024 by
//     Dr Maxim Orlovsky <orlovsky@ubideco.org>
//
// Copyright (C) 2021-2024 UBIDECO Labs,
//     Laboratories for Distributed and Cognitive Computing, Switzerland.
//     All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::{self, Debug, Display, Formatter};

/// Polymorphic 64-bit register cell.
///
/// A word has no intrinsic type: the same bits are read as a signed integer
/// ([`Word::i`]), an unsigned integer ([`Word::u`]) or an IEEE-754 double
/// ([`Word::f`]) depending on the instruction operating on it. Pointers are
/// carried through the unsigned view.
///
/// Equality and hashing are bitwise; two words holding `-0.0` and `0.0`
/// floats are *not* equal.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Word(u64);

impl Word {
    /// All-zeroes word, which is also the initial state of every register
    /// and extern slot.
    pub const ZERO: Word = Word(0);

    /// Unsigned view of the word.
    #[inline]
    pub const fn u(self) -> u64 { self.0 }

    /// Signed view of the word.
    #[inline]
    pub const fn i(self) -> i64 { self.0 as i64 }

    /// Floating-point view of the word.
    #[inline]
    pub fn f(self) -> f64 { f64::from_bits(self.0) }
}

impl From<u64> for Word {
    #[inline]
    fn from(val: u64) -> Self { Word(val) }
}

impl From<i64> for Word {
    #[inline]
    fn from(val: i64) -> Self { Word(val as u64) }
}

impl From<f64> for Word {
    #[inline]
    fn from(val: f64) -> Self { Word(val.to_bits()) }
}

impl Display for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "{:#018x}", self.0) }
}

impl Debug for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "Word({:#018x})", self.0) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn views_share_bits() {
        let word = Word::from(-1i64);
        assert_eq!(word.u(), u64::MAX);
        assert_eq!(word.i(), -1);

        let word = Word::from(2.0f64);
        assert_eq!(word.u(), 2.0f64.to_bits());
        assert_eq!(word.f(), 2.0);
    }

    #[test]
    fn zero_is_default() {
        assert_eq!(Word::default(), Word::ZERO);
        assert_eq!(Word::ZERO.i(), 0);
        assert_eq!(Word::ZERO.f(), 0.0);
    }
}
