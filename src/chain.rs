use core::fmt::Debug;

use crate::{Error, Result};

/// Ordered configuration steps, re-run from the earliest invalidated one.
///
/// Registration order is execution order. A new chain has every step pending.
pub struct DependencyChain<K, T> {
    steps: Vec<(K, fn(&mut T) -> Result<()>)>,
    first_invalid: Option<usize>,
}

impl<K: Copy + Eq + Debug, T> DependencyChain<K, T> {
    pub fn new() -> Self {
        DependencyChain { steps: Vec::new(), first_invalid: Some(0) }
    }

    pub fn register(&mut self, step: K, apply: fn(&mut T) -> Result<()>) {
        assert!(self.position(step).is_none(), "step {:?} registered twice", step);
        self.steps.push((step, apply));
    }

    fn position(&self, step: K) -> Option<usize> {
        self.steps.iter().position(|&(key, _)| key == step)
    }

    /// Mark `step` and every step after it as pending.
    pub fn invalidate_from(&mut self, step: K) -> Result<()> {
        let index = self.position(step)
            .ok_or_else(|| Error::invalid(format!("unknown configuration step {:?}", step)))?;
        self.first_invalid = Some(self.first_invalid.map_or(index, |first| first.min(index)));
        Ok(())
    }

    pub fn invalidate_all(&mut self) {
        self.first_invalid = Some(0)
    }

    pub fn is_complete(&self) -> bool {
        self.first_invalid.is_none()
    }

    /// Steps that will execute on the next call to [`run_pending`](Self::run_pending).
    pub fn pending(&self) -> Vec<K> {
        match self.first_invalid {
            Some(first) => self.steps[first.min(self.steps.len())..].iter()
                .map(|&(key, _)| key).collect(),
            None => Vec::new(),
        }
    }

    /// Execute pending steps in order. A failing step stays pending, as do the steps after it.
    pub fn run_pending(&mut self, target: &mut T) -> Result<()> {
        let Some(first) = self.first_invalid else { return Ok(()) };
        for index in first..self.steps.len() {
            let (step, apply) = self.steps[index];
            log::debug!("running configuration step {:?}", step);
            if let Err(error) = apply(target) {
                log::debug!("configuration step {:?} failed: {}", step, error);
                self.first_invalid = Some(index);
                return Err(error)
            }
            self.first_invalid = Some(index + 1);
        }
        self.first_invalid = None;
        Ok(())
    }
}

impl<K: Copy + Eq + Debug, T> Default for DependencyChain<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Debug, T> Debug for DependencyChain<K, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("DependencyChain")
            .field("steps", &self.steps.iter().map(|(key, _)| key).collect::<Vec<_>>())
            .field("first_invalid", &self.first_invalid)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step { First, Second, Third }

    #[derive(Default)]
    struct Log {
        ran: Vec<Step>,
        fail_second: bool,
    }

    fn chain() -> DependencyChain<Step, Log> {
        let mut chain = DependencyChain::new();
        chain.register(Step::First, |log: &mut Log| { log.ran.push(Step::First); Ok(()) });
        chain.register(Step::Second, |log: &mut Log| {
            if log.fail_second { return Err(Error::constraint("second")) }
            log.ran.push(Step::Second);
            Ok(())
        });
        chain.register(Step::Third, |log: &mut Log| { log.ran.push(Step::Third); Ok(()) });
        chain
    }

    #[test]
    fn test_new_chain_runs_everything() {
        let mut chain = chain();
        let mut log = Log::default();
        assert_eq!(chain.pending(), [Step::First, Step::Second, Step::Third]);
        chain.run_pending(&mut log).unwrap();
        assert_eq!(log.ran, [Step::First, Step::Second, Step::Third]);
        assert!(chain.is_complete());
        chain.run_pending(&mut log).unwrap();
        assert_eq!(log.ran.len(), 3);
    }

    #[test]
    fn test_rerun_from_earliest() {
        let mut chain = chain();
        let mut log = Log::default();
        chain.run_pending(&mut log).unwrap();
        log.ran.clear();
        chain.invalidate_from(Step::Third).unwrap();
        chain.invalidate_from(Step::Second).unwrap();
        chain.invalidate_from(Step::Third).unwrap();
        chain.run_pending(&mut log).unwrap();
        assert_eq!(log.ran, [Step::Second, Step::Third]);
    }

    #[test]
    fn test_failure_stops_chain() {
        let mut chain = chain();
        let mut log = Log { fail_second: true, ..Default::default() };
        assert!(matches!(chain.run_pending(&mut log), Err(Error::HardwareConstraintViolation(_))));
        assert_eq!(log.ran, [Step::First]);
        assert_eq!(chain.pending(), [Step::Second, Step::Third]);
        log.fail_second = false;
        chain.run_pending(&mut log).unwrap();
        assert_eq!(log.ran, [Step::First, Step::Second, Step::Third]);
    }
}
