use crate::suite::{Suite, TypedSuite};
use serde::{Deserialize, Serialize};
use tasklab_runner::{
    config::Settings, transport::block_partition, BoxedTask, Communicator, Convention, LocalTask,
    RegistryBuilder, RegistryError, Requirement, Sequential, Task, TransportError, Variant,
    WorldInfo,
};

pub const TASK_ID: &str = "trapezoid-integration";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Integrand {
    Square,
    Sine,
    Exp,
    /// coefficients in ascending powers
    Polynomial(Vec<f64>),
}

impl Integrand {
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            Self::Square => x * x,
            Self::Sine => x.sin(),
            Self::Exp => x.exp(),
            Self::Polynomial(coefficients) => coefficients
                .iter()
                .rev()
                .fold(0.0, |acc, coefficient| acc * x + coefficient),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Input {
    /// `square` or `{ polynomial: [..] }`
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub integrand: Integrand,
    pub lower: f64,
    pub upper: f64,
    pub intervals: usize,
}

impl Input {
    fn is_valid(&self) -> bool {
        self.intervals > 0
            && self.lower.is_finite()
            && self.upper.is_finite()
            && self.lower <= self.upper
    }

    fn width(&self) -> f64 {
        (self.upper - self.lower) / self.intervals as f64
    }

    /// area of the trapezoids with index in `intervals`
    fn area(&self, intervals: std::ops::Range<usize>) -> f64 {
        let width = self.width();

        intervals
            .map(|index| {
                let left = self.lower + index as f64 * width;
                let right = self.lower + (index + 1) as f64 * width;
                (self.integrand.eval(left) + self.integrand.eval(right)) * width / 2.0
            })
            .sum()
    }
}

pub type Output = f64;

#[derive(Debug, Clone)]
pub struct SequentialTrapezoid {
    input: Input,
    output: Output,
}

impl SequentialTrapezoid {
    pub fn new(input: Input) -> Self {
        Self { input, output: 0.0 }
    }
}

impl LocalTask for SequentialTrapezoid {
    type Input = Input;
    type Output = Output;

    fn validate(&self) -> bool {
        self.input.is_valid()
    }

    fn run(&mut self) -> bool {
        self.output = self.input.area(0..self.input.intervals);
        true
    }

    fn post_process(&mut self) -> bool {
        self.output.is_finite()
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

#[derive(Debug, Clone)]
pub struct DistributedTrapezoid {
    input: Input,
    output: Output,
}

impl DistributedTrapezoid {
    pub fn new(input: Input) -> Self {
        Self { input, output: 0.0 }
    }
}

impl Task for DistributedTrapezoid {
    type Input = Input;
    type Output = Output;

    fn convention(&self) -> Convention {
        Convention::Broadcast
    }

    fn validate(&self, _world: WorldInfo) -> bool {
        self.input.is_valid()
    }

    fn pre_process(&mut self, _comm: &Communicator<'_>) -> Result<bool, TransportError> {
        Ok(true)
    }

    fn run(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError> {
        let mine = block_partition(self.input.intervals, comm.world_size(), comm.rank());
        self.output = comm.all_reduce(self.input.area(mine), |a, b| a + b)?;

        Ok(true)
    }

    fn post_process(&mut self) -> bool {
        self.output.is_finite()
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

pub fn register(builder: &mut RegistryBuilder, _settings: &Settings) -> Result<(), RegistryError> {
    builder
        .register(TASK_ID, Variant::Sequential, Requirement::Any, |input: Input| {
            Sequential::boxed(SequentialTrapezoid::new(input))
        })?
        .register(TASK_ID, Variant::Distributed, Requirement::Any, |input: Input| {
            Box::new(DistributedTrapezoid::new(input)) as BoxedTask<Input, Output>
        })?;

    Ok(())
}

pub fn suite() -> Box<dyn Suite> {
    TypedSuite::<Input, Output>::boxed(TASK_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklab_runner::{transport::Collectives, Driver, Lifecycle, LocalWorld};

    fn square(intervals: usize) -> Input {
        Input {
            integrand: Integrand::Square,
            lower: 0.0,
            upper: 3.0,
            intervals,
        }
    }

    #[test]
    fn polynomial_uses_ascending_coefficients() {
        // 1 + 2x + 3x²
        assert_eq!(Integrand::Polynomial(vec![1.0, 2.0, 3.0]).eval(2.0), 17.0);
    }

    #[test]
    fn sequential_converges() {
        let mut task = SequentialTrapezoid::new(square(10_000));
        assert!(task.validate() && task.run());

        assert!((task.output() - 9.0).abs() < 1e-6);
    }

    #[test]
    fn ranks_agree_bit_for_bit() {
        for size in [1, 2, 3, 4, 7] {
            let outputs = LocalWorld::new(size)
                .run(|transport| {
                    let comm = Communicator::new(transport, Collectives::default());
                    let mut lifecycle = Lifecycle::new(
                        Box::new(DistributedTrapezoid::new(square(999))) as BoxedTask<Input, Output>
                    );
                    assert!(Driver.execute(&mut lifecycle, &comm).unwrap().succeeded());
                    *lifecycle.output()
                })
                .unwrap();

            assert!(outputs.iter().all(|output| output.to_bits() == outputs[0].to_bits()));
            assert!((outputs[0] - 9.0).abs() < 1e-4, "world size {size}: {}", outputs[0]);
        }
    }

    #[test]
    fn degenerate_ranges_are_invalid() {
        assert!(!square(0).is_valid());
        assert!(!Input {
            lower: 2.0,
            upper: 1.0,
            ..square(4)
        }
        .is_valid());
    }

    #[test]
    fn reads_fixture_input() {
        let input: Input = serde_yaml::from_str(
            "{ integrand: { polynomial: [0, 1] }, lower: 0, upper: 2, intervals: 4 }",
        )
        .unwrap();

        assert_eq!(input.integrand, Integrand::Polynomial(vec![0.0, 1.0]));
        assert_eq!(input.area(0..input.intervals), 2.0);
    }

    #[test]
    fn reads_unit_integrands_and_values() {
        let input: Input =
            serde_yaml::from_str("{ integrand: sine, lower: 0, upper: 1, intervals: 2 }").unwrap();
        assert_eq!(input.integrand, Integrand::Sine);

        // fixtures reach the suite as untyped values first
        let value: serde_yaml::Value = serde_yaml::from_str(
            "{ integrand: { polynomial: [1.0, 2.0] }, lower: 0.0, upper: 2.0, intervals: 7 }",
        )
        .unwrap();
        let input: Input = serde_yaml::from_value(value).unwrap();
        assert_eq!(input.integrand, Integrand::Polynomial(vec![1.0, 2.0]));
        assert!((input.area(0..input.intervals) - 6.0).abs() < 1e-12);
    }
}
