//! Canvas-space geometry shared by the tree model and the layout passes.

use serde::{Deserialize, Serialize};

use crate::layout_engine::Orientation;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self { Point { x, y } }

    pub fn distance_to(self, other: Point) -> f64 { f64::hypot(self.x - other.x, self.y - other.y) }

    pub fn offset(self, dx: f64, dy: f64) -> Point { Point::new(self.x + dx, self.y + dy) }

    /// Coordinate along the rank axis of `orientation`.
    ///
    /// A vertical tree grows along `y`, so ranks are rows and siblings are
    /// spread on `x`; a horizontal tree is the transpose.
    pub fn along(self, orientation: Orientation) -> f64 {
        match orientation {
            Orientation::Vertical => self.y,
            Orientation::Horizontal => self.x,
        }
    }

    /// Coordinate on the sibling (cross) axis of `orientation`.
    pub fn cross(self, orientation: Orientation) -> f64 {
        match orientation {
            Orientation::Vertical => self.x,
            Orientation::Horizontal => self.y,
        }
    }

    /// Inverse of [`Point::along`] / [`Point::cross`].
    pub fn from_axes(orientation: Orientation, along: f64, cross: f64) -> Point {
        match orientation {
            Orientation::Vertical => Point::new(cross, along),
            Orientation::Horizontal => Point::new(along, cross),
        }
    }
}

pub trait IsWithin {
    fn is_within(&self, how_much: f64, other: Self) -> bool;
}

impl IsWithin for Point {
    fn is_within(&self, how_much: f64, other: Self) -> bool {
        self.x.is_within(how_much, other.x) && self.y.is_within(how_much, other.y)
    }
}

impl IsWithin for f64 {
    fn is_within(&self, how_much: f64, other: Self) -> bool { (self - other).abs() < how_much }
}

pub trait SameAs: IsWithin + Sized {
    fn same_as(&self, other: Self) -> bool { self.is_within(0.1, other) }
}

impl SameAs for Point {}
