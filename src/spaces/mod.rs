/// Action spaces the vector env samples from in random-action mode.

pub mod space;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

pub use space::Space;

/// A discrete space of integers in [0, n).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discrete {
    n: u32,
}

impl Discrete {
    pub fn new(n: u32) -> Self {
        assert!(n > 0, "Discrete space requires n > 0");
        Self { n }
    }

    pub fn n(&self) -> u32 { self.n }
}

impl Space for Discrete {
    type Element = u32;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        if self.n == 1 { return 0; }
        Uniform::from(0..self.n).sample(rng)
    }

    fn contains(&self, elem: &Self::Element) -> bool { *elem < self.n }
}

/// A continuous box with per-dimension inclusive bounds and fixed length `N`.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxSpace<const N: usize> {
    low: [f32; N],
    high: [f32; N],
}

impl<const N: usize> BoxSpace<N> {
    pub fn new(low: [f32; N], high: [f32; N]) -> Self {
        for i in 0..N {
            assert!(low[i] <= high[i], "low[{i}] > high[{i}]");
        }
        Self { low, high }
    }

    pub fn low(&self) -> &[f32; N] { &self.low }
    pub fn high(&self) -> &[f32; N] { &self.high }
}

impl<const N: usize> Space for BoxSpace<N> {
    type Element = [f32; N];

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        let mut arr = self.low;
        for i in 0..N {
            arr[i] = Uniform::new_inclusive(self.low[i], self.high[i]).sample(rng);
        }
        arr
    }

    fn contains(&self, elem: &Self::Element) -> bool {
        (0..N).all(|i| self.low[i] <= elem[i] && elem[i] <= self.high[i])
    }
}
