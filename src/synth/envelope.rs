// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Control-rate DAHDSR amplitude envelope.

/// The level at which a releasing envelope is considered finished.
const FLOOR_DB: f64 = -96.0;

/// Envelope timing. All times are in seconds.
///
/// Decay and release are expressed as the time a full 96 dB fall would take, so a
/// note released at a quieter level finishes proportionally sooner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvelopeParams {
    pub delay: f64,
    pub attack: f64,
    pub hold: f64,
    pub decay: f64,
    /// Linear sustain level, 0.0 to 1.0.
    pub sustain: f64,
    pub release: f64,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        EnvelopeParams {
            delay: 0.0,
            attack: 0.005,
            hold: 0.0,
            decay: 2.0,
            sustain: 0.6,
            release: 0.3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Finished,
}

#[derive(Clone, Debug)]
pub struct Envelope {
    params: EnvelopeParams,
    stage: Stage,
    elapsed: f64,
    level_db: f64,
    value: f64,
}

fn to_db(value: f64) -> f64 {
    if value <= 0.0 {
        FLOOR_DB
    } else {
        (20.0 * value.log10()).max(FLOOR_DB)
    }
}

fn from_db(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

impl Envelope {
    pub fn new(params: EnvelopeParams) -> Envelope {
        Envelope {
            params,
            stage: Stage::Delay,
            elapsed: 0.0,
            level_db: FLOOR_DB,
            value: 0.0,
        }
    }

    /// Restarts the envelope from the delay stage.
    pub fn restart(&mut self, params: EnvelopeParams) {
        *self = Envelope::new(params);
    }

    /// Moves the envelope into its release stage.
    pub fn release(&mut self) {
        match self.stage {
            Stage::Release | Stage::Finished => {}
            _ => {
                self.level_db = to_db(self.value);
                self.stage = Stage::Release;
                self.elapsed = 0.0;
            }
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self.stage, Stage::Release | Stage::Finished)
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Advances the envelope by one control period and returns the new level.
    pub fn advance(&mut self, dt: f64) -> f64 {
        let p = self.params;
        let mut remaining = dt;

        // Zero-length stages fall straight through to the next one.
        loop {
            match self.stage {
                Stage::Delay => {
                    self.value = 0.0;
                    if self.elapsed + remaining < p.delay {
                        self.elapsed += remaining;
                        break;
                    }
                    remaining -= (p.delay - self.elapsed).max(0.0);
                    self.stage = Stage::Attack;
                    self.elapsed = 0.0;
                }
                Stage::Attack => {
                    if p.attack > 0.0 && self.elapsed + remaining < p.attack {
                        self.elapsed += remaining;
                        self.value = self.elapsed / p.attack;
                        break;
                    }
                    remaining -= (p.attack - self.elapsed).max(0.0);
                    self.value = 1.0;
                    self.stage = Stage::Hold;
                    self.elapsed = 0.0;
                }
                Stage::Hold => {
                    self.value = 1.0;
                    if self.elapsed + remaining < p.hold {
                        self.elapsed += remaining;
                        break;
                    }
                    remaining -= (p.hold - self.elapsed).max(0.0);
                    self.stage = Stage::Decay;
                    self.level_db = 0.0;
                    self.elapsed = 0.0;
                }
                Stage::Decay => {
                    let sustain_db = to_db(p.sustain);
                    if p.decay > 0.0 {
                        self.level_db += FLOOR_DB * remaining / p.decay;
                    } else {
                        self.level_db = sustain_db;
                    }
                    if self.level_db <= sustain_db {
                        self.level_db = sustain_db;
                        self.stage = if sustain_db <= FLOOR_DB {
                            Stage::Finished
                        } else {
                            Stage::Sustain
                        };
                    }
                    self.value = if self.stage == Stage::Finished {
                        0.0
                    } else {
                        from_db(self.level_db)
                    };
                    break;
                }
                Stage::Sustain => {
                    self.value = p.sustain;
                    break;
                }
                Stage::Release => {
                    if p.release > 0.0 {
                        self.level_db += FLOOR_DB * remaining / p.release;
                    } else {
                        self.level_db = FLOOR_DB;
                    }
                    if self.level_db <= FLOOR_DB {
                        self.stage = Stage::Finished;
                        self.value = 0.0;
                    } else {
                        self.value = from_db(self.level_db);
                    }
                    break;
                }
                Stage::Finished => {
                    self.value = 0.0;
                    break;
                }
            }
        }

        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1.0 / 147.0;

    #[test]
    fn test_attack_reaches_full_level() {
        let mut envelope = Envelope::new(EnvelopeParams {
            attack: 10.0 * DT,
            ..Default::default()
        });

        let first = envelope.advance(DT);
        assert!((first - 0.1).abs() < 1e-9);

        for _ in 0..9 {
            envelope.advance(DT);
        }
        // The first decay step starts right at the top.
        assert!(envelope.value() > 0.99);
    }

    #[test]
    fn test_decay_settles_on_sustain() {
        let mut envelope = Envelope::new(EnvelopeParams {
            attack: 0.0,
            decay: 0.1,
            sustain: 0.5,
            ..Default::default()
        });

        for _ in 0..100 {
            envelope.advance(DT);
        }
        assert!((envelope.value() - 0.5).abs() < 1e-9);
        assert!(!envelope.is_finished());
    }

    #[test]
    fn test_release_finishes() {
        let mut envelope = Envelope::new(EnvelopeParams {
            attack: 0.0,
            release: 0.05,
            ..Default::default()
        });
        envelope.advance(DT);
        envelope.release();
        assert!(envelope.is_released());

        let mut steps = 0;
        while !envelope.is_finished() {
            envelope.advance(DT);
            steps += 1;
            assert!(steps < 100, "release never finished");
        }
        assert_eq!(0.0, envelope.value());
    }

    #[test]
    fn test_zero_sustain_finishes_after_decay() {
        let mut envelope = Envelope::new(EnvelopeParams {
            attack: 0.0,
            decay: 0.05,
            sustain: 0.0,
            ..Default::default()
        });
        for _ in 0..20 {
            envelope.advance(DT);
        }
        assert!(envelope.is_finished());
    }

    #[test]
    fn test_delay_holds_silence() {
        let mut envelope = Envelope::new(EnvelopeParams {
            delay: 3.5 * DT,
            attack: 0.0,
            ..Default::default()
        });
        for _ in 0..3 {
            assert_eq!(0.0, envelope.advance(DT));
        }
        assert!(envelope.advance(DT) > 0.9);
    }
}
