//! Frequency sweeps.
//!
//! A [`SweepPlan`] names the frequencies; [`ImpedanceApp::sweep`] walks them,
//! reconfiguring and measuring at each one. The sweep is lazy: nothing touches
//! the device until the iterator is advanced, and dropping it early simply
//! stops the sweep.
//!
//! ```no_run
//! use ad5940_serial::{Ad5940, ImpedanceApp};
//! use ad5940_serial::sweep::{Spacing, SweepPlan};
//!
//! let mut afe = Ad5940::connect("/dev/ttyUSB0", 115_200)?;
//! afe.initialize()?;
//! let mut app = ImpedanceApp::default();
//! app.calibrate(&mut afe)?;
//!
//! let plan = SweepPlan::new(1_000.0, 100_000.0, 21, Spacing::Logarithmic);
//! for point in app.sweep(&mut afe, plan)? {
//!     match point.result {
//!         Ok(z) => println!("{:>10.1} Hz  {:.1} Ω", point.frequency_hz, z.norm()),
//!         Err(e) => eprintln!("{:>10.1} Hz  {e}", point.frequency_hz),
//!     }
//! }
//! # Ok::<(), ad5940_serial::Error>(())
//! ```

use embedded_hal::delay::DelayNs;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::driver::Ad5940;
use crate::impedance::ImpedanceApp;
use crate::transport::Transport;
use crate::Error;

/// How sweep frequencies are distributed between the end points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spacing {
    /// Equal steps in Hz.
    #[default]
    Linear,
    /// Equal ratios between neighbouring points.
    Logarithmic,
}

/// Frequencies to visit in a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    /// First frequency in Hz.
    pub start_hz: f64,
    /// Last frequency in Hz.
    pub stop_hz: f64,
    /// Number of points, including both end points.
    pub points: u32,
    /// Distribution of the points.
    pub spacing: Spacing,
}

impl SweepPlan {
    /// A plan from `start_hz` to `stop_hz` over `points` points.
    pub fn new(start_hz: f64, stop_hz: f64, points: u32, spacing: Spacing) -> Self {
        Self {
            start_hz,
            stop_hz,
            points,
            spacing,
        }
    }

    /// Check that every frequency of the plan can be computed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] for a logarithmic plan whose end points
    /// are not both positive.
    pub fn validate(&self) -> Result<(), Error> {
        if self.spacing == Spacing::Logarithmic && (self.start_hz <= 0.0 || self.stop_hz <= 0.0) {
            return Err(Error::InvalidConfiguration(
                "logarithmic sweep needs positive end points",
            ));
        }
        Ok(())
    }

    /// Frequency of point `index`.
    ///
    /// A single-point plan yields `start_hz`. Indexes past the last point
    /// extrapolate.
    pub fn frequency(&self, index: u32) -> f64 {
        if self.points <= 1 {
            return self.start_hz;
        }
        let steps = f64::from(self.points - 1);
        let i = f64::from(index);
        match self.spacing {
            Spacing::Linear => self.start_hz + (self.stop_hz - self.start_hz) * i / steps,
            Spacing::Logarithmic => {
                let decades = (self.stop_hz / self.start_hz).log10();
                self.start_hz * 10f64.powf(i * decades / steps)
            }
        }
    }

    /// Every frequency of the plan, in order.
    pub fn frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.points).map(|i| self.frequency(i))
    }
}

/// Outcome of one sweep point.
#[derive(Debug)]
pub struct SweepPoint {
    /// Position in the sweep, from zero.
    pub index: u32,
    /// Excitation frequency in Hz.
    pub frequency_hz: f64,
    /// Impedance, or why this point could not be measured.
    pub result: Result<Complex32, Error>,
}

/// Iterator over the points of a running sweep, see [`ImpedanceApp::sweep`].
#[derive(Debug)]
pub struct Sweep<'a, T, D> {
    app: &'a mut ImpedanceApp<D>,
    afe: &'a mut Ad5940<T>,
    plan: SweepPlan,
    next: u32,
}

impl<T: Transport, D: DelayNs> Iterator for Sweep<'_, T, D> {
    type Item = SweepPoint;

    fn next(&mut self) -> Option<SweepPoint> {
        if self.next >= self.plan.points {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let frequency_hz = self.plan.frequency(index);
        self.app.config_mut().sin_freq_hz = frequency_hz;
        let result = match self.app.configure(self.afe) {
            Ok(()) => self.app.measure(self.afe),
            Err(e) => Err(e),
        };
        match &result {
            Err(Error::Cancelled) => {
                log::info!("sweep cancelled at point {index}");
                self.next = self.plan.points;
            }
            Err(e) => log::warn!("sweep point {index} at {frequency_hz:.1} Hz failed: {e}"),
            Ok(_) => {}
        }
        Some(SweepPoint {
            index,
            frequency_hz,
            result,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.plan.points - self.next).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl<T: Transport, D: DelayNs> ExactSizeIterator for Sweep<'_, T, D> {}

impl<D: DelayNs> ImpedanceApp<D> {
    /// Start a sweep over `plan`.
    ///
    /// Each point sets the excitation frequency, re-runs
    /// [`ImpedanceApp::configure`], and then [`ImpedanceApp::measure`]. A failed
    /// point is reported in its [`SweepPoint`] and the sweep carries on with
    /// the next one, except that a cancelled point is the last one yielded.
    /// The existing calibration is used for every point.
    ///
    /// After the sweep, the configured frequency is that of the last point
    /// visited.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if the plan is invalid, see
    /// [`SweepPlan::validate`].
    pub fn sweep<'a, T: Transport>(
        &'a mut self,
        afe: &'a mut Ad5940<T>,
        plan: SweepPlan,
    ) -> Result<Sweep<'a, T, D>, Error> {
        plan.validate()?;
        log::debug!("starting sweep {plan:?}");
        Ok(Sweep {
            app: self,
            afe,
            plan,
            next: 0,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linear_sweep_includes_both_end_points() {
        let plan = SweepPlan::new(1_000.0, 150_000.0, 5, Spacing::Linear);
        let frequencies: Vec<f64> = plan.frequencies().collect();
        assert_eq!(frequencies.len(), 5);
        assert_relative_eq!(frequencies[0], 1_000.0);
        assert_relative_eq!(frequencies[1], 38_250.0);
        assert_relative_eq!(frequencies[4], 150_000.0);
        assert!(frequencies.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn logarithmic_sweep_steps_by_decades() {
        let plan = SweepPlan::new(100.0, 10_000.0, 3, Spacing::Logarithmic);
        let frequencies: Vec<f64> = plan.frequencies().collect();
        assert_relative_eq!(frequencies[0], 100.0);
        assert_relative_eq!(frequencies[1], 1_000.0, max_relative = 1e-12);
        assert_relative_eq!(frequencies[2], 10_000.0, max_relative = 1e-12);
    }

    #[test]
    fn descending_sweep() {
        let plan = SweepPlan::new(10_000.0, 100.0, 3, Spacing::Logarithmic);
        let frequencies: Vec<f64> = plan.frequencies().collect();
        assert_relative_eq!(frequencies[1], 1_000.0, max_relative = 1e-12);
        assert_relative_eq!(frequencies[2], 100.0, max_relative = 1e-12);
    }

    #[test]
    fn single_point_is_start() {
        let plan = SweepPlan::new(2_000.0, 9_000.0, 1, Spacing::Linear);
        assert_eq!(plan.frequencies().collect::<Vec<_>>(), vec![2_000.0]);
        let empty = SweepPlan::new(2_000.0, 9_000.0, 0, Spacing::Linear);
        assert_eq!(empty.frequencies().count(), 0);
    }

    #[test]
    fn logarithmic_plan_rejects_zero_start() {
        let plan = SweepPlan::new(0.0, 1_000.0, 10, Spacing::Logarithmic);
        assert!(matches!(
            plan.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
        let linear = SweepPlan::new(0.0, 1_000.0, 10, Spacing::Linear);
        assert!(linear.validate().is_ok());
    }
}
