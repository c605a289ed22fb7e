//! Which iterations produce a client-visible update.

/// What the loop emits after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Warm-up or stride-misaligned iteration: nothing is sent.
    Skip,
    /// Progress only.
    SilentTick,
    /// Decode and send a thumbnail update.
    Preview,
    /// Decode and send the full-resolution final update.
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadencePolicy {
    total: usize,
    order: usize,
    num_warmup_steps: usize,
    callback_steps: usize,
    callback_start: usize,
}

impl CadencePolicy {
    /// `total` is the number of schedule entries that will run, after any
    /// early cutoff. `num_warmup_steps` comes from the uncut schedule.
    pub fn new(
        total: usize,
        order: usize,
        num_warmup_steps: usize,
        callback_steps: usize,
        callback_start: usize,
    ) -> Self {
        Self {
            total,
            order: order.max(1),
            num_warmup_steps,
            callback_steps: callback_steps.max(1),
            callback_start,
        }
    }

    /// Entries beyond `steps * order` at the head of a schedule.
    pub fn warmup_steps(schedule_len: usize, steps: usize, order: usize) -> usize {
        schedule_len.saturating_sub(steps * order)
    }

    pub fn action(&self, i: usize) -> StepAction {
        if i + 1 == self.total {
            return StepAction::Terminal;
        }
        let step = i + 1;
        if step > self.num_warmup_steps && step % self.order == 0 {
            if step >= self.callback_start && i % self.callback_steps == 0 {
                StepAction::Preview
            } else {
                StepAction::SilentTick
            }
        } else {
            StepAction::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(policy: &CadencePolicy) -> Vec<StepAction> {
        (0..policy.total).map(|i| policy.action(i)).collect()
    }

    #[test]
    fn test_twenty_steps_every_five_from_ten() {
        let policy = CadencePolicy::new(20, 1, 0, 5, 10);
        let previews: Vec<usize> = (0..20)
            .filter(|&i| policy.action(i) == StepAction::Preview)
            .collect();
        assert_eq!(previews, vec![10, 15]);
        assert_eq!(policy.action(19), StepAction::Terminal);
        assert_eq!(policy.action(9), StepAction::SilentTick);
        assert_eq!(policy.action(14), StepAction::SilentTick);
        assert_eq!(policy.action(0), StepAction::SilentTick);
    }

    #[test]
    fn test_every_step_previews() {
        let policy = CadencePolicy::new(6, 1, 0, 1, 1);
        let a = actions(&policy);
        assert!(a[..5].iter().all(|&x| x == StepAction::Preview));
        assert_eq!(a[5], StepAction::Terminal);
    }

    #[test]
    fn test_only_terminal_decodes() {
        let policy = CadencePolicy::new(8, 1, 0, 8, 8);
        let a = actions(&policy);
        assert!(a[..7].iter().all(|&x| x == StepAction::SilentTick));
        assert_eq!(a[7], StepAction::Terminal);
    }

    #[test]
    fn test_second_order_stride() {
        // Heun with 4 steps: 7 schedule entries, no warm-up.
        let warmup = CadencePolicy::warmup_steps(7, 4, 2);
        assert_eq!(warmup, 0);
        let policy = CadencePolicy::new(7, 2, warmup, 1, 0);
        assert_eq!(
            actions(&policy),
            vec![
                StepAction::Skip,
                StepAction::Preview,
                StepAction::Skip,
                StepAction::Preview,
                StepAction::Skip,
                StepAction::Preview,
                StepAction::Terminal,
            ]
        );
    }

    #[test]
    fn test_warmup_entries_skipped() {
        let policy = CadencePolicy::new(6, 1, 2, 1, 0);
        let a = actions(&policy);
        assert_eq!(a[0], StepAction::Skip);
        assert_eq!(a[1], StepAction::Skip);
        assert_eq!(a[2], StepAction::Preview);
    }

    #[test]
    fn test_single_step_is_terminal() {
        let policy = CadencePolicy::new(1, 1, 0, 3, 0);
        assert_eq!(policy.action(0), StepAction::Terminal);
    }
}
