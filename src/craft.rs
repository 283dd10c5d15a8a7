//! Craft kinematics, shared by the fitness simulator and any interactive
//! front end. Each consumer owns its own `Craft`; nothing here is global.
//!
//! Heading convention follows the game's sprite sheet: 0 degrees faces north,
//! positive rotation is clockwise, so the forward vector is
//! `(cos(heading - 90°), sin(heading - 90°))` in screen coordinates.

use crate::constants::{ARENA_HEIGHT, ARENA_WIDTH};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Craft {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// Heading in degrees, 0 = north.
    pub heading_deg: f32,
}

impl Craft {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            heading_deg: 0.0,
        }
    }

    fn forward_rad(&self) -> f32 {
        (self.heading_deg - 90.0).to_radians()
    }

    /// Accelerate along the current heading.
    pub fn thrust(&mut self, power: f32) {
        let angle = self.forward_rad();
        self.vx += angle.cos() * power;
        self.vy += angle.sin() * power;
    }

    /// Accelerate perpendicular to the heading; `direction` is -1 (left)
    /// or +1 (right).
    pub fn strafe(&mut self, direction: f32, power: f32) {
        let angle = self.forward_rad() + direction.signum() * core::f32::consts::FRAC_PI_2;
        self.vx += angle.cos() * power;
        self.vy += angle.sin() * power;
    }

    pub fn rotate_by(&mut self, delta_deg: f32) {
        self.heading_deg += delta_deg;
    }

    pub fn apply_drag(&mut self, factor: f32) {
        self.vx *= factor;
        self.vy *= factor;
    }

    pub fn clamp_speed(&mut self, max_speed: f32) {
        let speed = self.speed();
        if speed > max_speed {
            let scale = max_speed / speed;
            self.vx *= scale;
            self.vy *= scale;
        }
    }

    pub fn speed(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }

    /// Advance position by one frame of velocity.
    pub fn integrate(&mut self) {
        self.x += self.vx;
        self.y += self.vy;
    }

    /// Teleport across the arena edge the craft just crossed.
    pub fn wrap_to_arena(&mut self) {
        if self.x < 0.0 {
            self.x = ARENA_WIDTH;
        } else if self.x > ARENA_WIDTH {
            self.x = 0.0;
        }
        if self.y < 0.0 {
            self.y = ARENA_HEIGHT;
        } else if self.y > ARENA_HEIGHT {
            self.y = 0.0;
        }
    }

    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        let dx = x - self.x;
        let dy = y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thrust_at_zero_heading_accelerates_north() {
        let mut craft = Craft::new(100.0, 100.0);
        craft.thrust(1.0);
        assert!(craft.vx.abs() < 1e-5);
        assert!((craft.vy + 1.0).abs() < 1e-5, "vy={}", craft.vy);
    }

    #[test]
    fn strafe_right_is_perpendicular_to_heading() {
        let mut craft = Craft::new(0.0, 0.0);
        craft.strafe(1.0, 1.0);
        assert!((craft.vx - 1.0).abs() < 1e-5, "vx={}", craft.vx);
        assert!(craft.vy.abs() < 1e-5);
    }

    #[test]
    fn clamp_preserves_direction() {
        let mut craft = Craft::new(0.0, 0.0);
        craft.vx = 6.0;
        craft.vy = 8.0;
        craft.clamp_speed(5.0);
        assert!((craft.speed() - 5.0).abs() < 1e-4);
        assert!((craft.vx / craft.vy - 0.75).abs() < 1e-5);
    }

    #[test]
    fn wrap_teleports_across_edges() {
        let mut craft = Craft::new(-1.0, ARENA_HEIGHT + 1.0);
        craft.wrap_to_arena();
        assert_eq!(craft.x, ARENA_WIDTH);
        assert_eq!(craft.y, 0.0);
    }
}
