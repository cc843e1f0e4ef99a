//! Authoritative game simulation.
//!
//! The session drives this once per tick. Ticks alternate between turbo
//! rounds and normal rounds: on a turbo round only players with boost
//! engaged move, so a boosting snake travels at double speed. The round
//! flag flips at the start of every tick, which makes the very first tick
//! after the countdown a turbo round.

use crate::map::SnakeMap;
use crate::player::{PlayerState, Seat};
use crate::rng::GameRng;
use log::info;
use shared::{Point, INITIAL_FOOD, INITIAL_TURBO};
use std::sync::Arc;

/// Tunable rule variants, kept separate from the fixed field constants.
#[derive(Debug, Clone, Copy)]
pub struct GameRules {
    /// When set, eating a food also removes one segment from the
    /// opponent's tail.
    pub food_shortens_opponent: bool,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            food_shortens_opponent: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Draw,
    Winner(Seat),
}

pub struct GameState {
    pub map: Arc<SnakeMap>,
    pub food: Vec<Point>,
    pub turbo: Vec<Point>,
    pub turbo_round: bool,
    pub rules: GameRules,
    rng: GameRng,
}

impl GameState {
    pub fn new(map: Arc<SnakeMap>, rules: GameRules, rng: GameRng) -> Self {
        Self {
            map,
            food: Vec::new(),
            turbo: Vec::new(),
            turbo_round: false,
            rules,
            rng,
        }
    }

    /// Resets both players onto their start bodies and scatters the initial
    /// pickups onto free cells.
    pub fn start(&mut self, p1: &mut PlayerState, p2: &mut PlayerState) {
        p1.reset(self.map.start_body(0), self.map.starts[0].direction);
        p2.reset(self.map.start_body(1), self.map.starts[1].direction);
        self.food.clear();
        self.turbo.clear();
        self.turbo_round = false;
        for _ in 0..INITIAL_FOOD {
            let cell = self.free_cell(p1, p2);
            self.food.push(cell);
        }
        for _ in 0..INITIAL_TURBO {
            let cell = self.free_cell(p1, p2);
            self.turbo.push(cell);
        }
    }

    /// Advances the simulation by one tick: movement, collisions, pickups,
    /// turbo burn, then the survival verdict.
    pub fn tick(&mut self, p1: &mut PlayerState, p2: &mut PlayerState) -> TickOutcome {
        self.turbo_round = !self.turbo_round;

        let mut failed = [false; 2];
        let mut moved = [false; 2];
        {
            let players: [&mut PlayerState; 2] = [&mut *p1, &mut *p2];
            for (i, player) in players.into_iter().enumerate() {
                if self.turbo_round && !player.turbo_enabled {
                    continue;
                }
                let head = match player.head() {
                    Some(head) => head,
                    None => {
                        failed[i] = true;
                        continue;
                    }
                };
                moved[i] = true;
                let direction = player.resolve_direction();
                let new_head = head.step(direction).wrapped(self.map.width, self.map.height);
                // The tail cell (index 0) is vacated this tick, so moving
                // into it is legal
                if player.snake.iter().skip(1).any(|&cell| cell == new_head)
                    || self.map.walls.contains(&new_head)
                {
                    failed[i] = true;
                }
                player.snake.push(new_head);
            }
        }

        let head1 = if moved[0] { p1.head() } else { None };
        let head2 = if moved[1] { p2.head() } else { None };

        // Food: an eater keeps its tail and, under the default rules, clips
        // the opponent's. Two heads landing on the same food both grow and
        // consume a single item.
        let ate1 = head1.map_or(false, |h| self.food.contains(&h));
        let ate2 = head2.map_or(false, |h| self.food.contains(&h));
        let same_food = ate1 && ate2 && head1 == head2;

        if ate1 {
            if let Some(h) = head1 {
                self.food.retain(|&cell| cell != h);
            }
            if same_food {
                info!("Both players ate the same food");
            } else {
                info!("Player 1 ate a food");
                if self.rules.food_shortens_opponent {
                    p2.drop_tail();
                }
            }
        } else if moved[0] {
            p1.drop_tail();
        }

        if ate2 {
            if !same_food {
                if let Some(h) = head2 {
                    self.food.retain(|&cell| cell != h);
                }
                info!("Player 2 ate a food");
                if self.rules.food_shortens_opponent {
                    p1.drop_tail();
                }
            }
        } else if moved[1] {
            p2.drop_tail();
        }

        if p1.snake.is_empty() {
            failed[0] = true;
        }
        if p2.snake.is_empty() {
            failed[1] = true;
        }

        for _ in 0..INITIAL_FOOD.saturating_sub(self.food.len()) {
            let cell = self.free_cell(p1, p2);
            self.food.push(cell);
        }

        // Turbo pickups, symmetric to food but without the tail clipping
        let turbo1 = head1.map_or(false, |h| self.turbo.contains(&h));
        let turbo2 = head2.map_or(false, |h| self.turbo.contains(&h));
        let same_turbo = turbo1 && turbo2 && head1 == head2;

        if turbo1 {
            if let Some(h) = head1 {
                self.turbo.retain(|&cell| cell != h);
            }
            p1.grant_turbo();
            if same_turbo {
                p2.grant_turbo();
                info!("Both players ate the same turbo");
            } else {
                info!("Player 1 ate a turbo");
            }
        }

        if turbo2 && !same_turbo {
            if let Some(h) = head2 {
                self.turbo.retain(|&cell| cell != h);
            }
            p2.grant_turbo();
            info!("Player 2 ate a turbo");
        }

        for _ in 0..INITIAL_TURBO.saturating_sub(self.turbo.len()) {
            let cell = self.free_cell(p1, p2);
            self.turbo.push(cell);
        }

        p1.consume_turbo();
        p2.consume_turbo();

        match (failed[0], failed[1]) {
            (true, true) => TickOutcome::Draw,
            (true, false) => TickOutcome::Winner(Seat::Two),
            (false, true) => TickOutcome::Winner(Seat::One),
            (false, false) => TickOutcome::Continue,
        }
    }

    /// Picks a uniformly random cell occupied by nothing: no wall, no
    /// pickup, no snake segment.
    fn free_cell(&mut self, p1: &PlayerState, p2: &PlayerState) -> Point {
        loop {
            let cell = Point::new(
                self.rng.range(1..=self.map.width),
                self.rng.range(1..=self.map.height),
            );
            if self.map.walls.contains(&cell)
                || self.food.contains(&cell)
                || self.turbo.contains(&cell)
                || p1.snake.contains(&cell)
                || p2.snake.contains(&cell)
            {
                continue;
            }
            return cell;
        }
    }
}
