//! The denoising loop controller.
//!
//! One run walks the scheduler's timesteps, calls the noise oracle once per
//! entry, and hands each update to the sink before the next entry starts.
//! Progress is tracked by an explicit [`LoopState`] machine.

use std::time::Instant;

use lumen_core::{
    Backend, Conditioning, LumenError, NoiseInput, Result, StepUpdate, Tensor,
};
use lumen_scheduler::build_scheduler;
use lumen_transport::UpdateSink;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::StandardNormal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cadence::{CadencePolicy, StepAction};
use crate::decode::{Postprocessor, UpcastGuard};
use crate::guidance::GuidanceCombiner;
use crate::params::ResolvedParams;
use crate::pipeline::Pipeline;

/// Controller state. `Stepping(i)` and `Finalizing(i)` carry the index of
/// the schedule entry about to run; `Finalizing` is the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Stepping(usize),
    Finalizing(usize),
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// Schedule, conditioning and latents are ready.
    Initialized { total_steps: usize },
    /// The current entry ran and its update (if any) was delivered.
    StepCompleted { total_steps: usize },
    Error,
}

impl LoopState {
    pub fn next(self, event: LoopEvent) -> Result<LoopState> {
        use LoopEvent::*;
        use LoopState::*;
        match (self, event) {
            (Done | Failed, _) => Err(LumenError::Internal(format!(
                "{event:?} received in terminal state {self:?}"
            ))),
            (_, Error) => Ok(Failed),
            (Initializing, Initialized { total_steps: 1 }) => Ok(Finalizing(0)),
            (Initializing, Initialized { total_steps }) if total_steps > 1 => Ok(Stepping(0)),
            (Stepping(i), StepCompleted { total_steps }) if i + 2 == total_steps => {
                Ok(Finalizing(i + 1))
            }
            (Stepping(i), StepCompleted { total_steps }) if i + 2 < total_steps => {
                Ok(Stepping(i + 1))
            }
            (Finalizing(_), StepCompleted { .. }) => Ok(Done),
            _ => Err(LumenError::Internal(format!(
                "invalid loop transition from {self:?} on {event:?}"
            ))),
        }
    }

    /// Current schedule index while the loop is running.
    pub fn current_step(&self) -> Option<usize> {
        match self {
            LoopState::Stepping(i) | LoopState::Finalizing(i) => Some(*i),
            _ => None,
        }
    }
}

/// Server-side knobs that are not part of the client request.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// 0 disables guidance rescale.
    pub guidance_rescale: f32,
    /// Fraction of the noise range to denoise before stopping, in (0, 1).
    pub denoising_end: Option<f64>,
    pub postprocess: Postprocessor,
    /// Cancel the run once this instant passes.
    pub deadline: Option<Instant>,
    /// Cancel the run once this flips to true.
    pub cancel: Option<watch::Receiver<bool>>,
    /// Start from these latents instead of sampling noise.
    pub latents: Option<Vec<f32>>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            guidance_rescale: 0.0,
            denoising_end: None,
            postprocess: Postprocessor::default(),
            deadline: None,
            cancel: None,
            latents: None,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub executed_steps: usize,
    pub emitted: usize,
    pub decoded: usize,
    pub seed: u64,
}

/// Keep the prefix of `timesteps` at or above the cutoff implied by
/// `denoising_end`. At least one entry is always kept.
pub fn apply_denoising_end(
    timesteps: &[f64],
    denoising_end: Option<f64>,
    num_train_timesteps: usize,
) -> Vec<f64> {
    let Some(end) = denoising_end.filter(|d| *d > 0.0 && *d < 1.0) else {
        return timesteps.to_vec();
    };
    let train = num_train_timesteps as f64;
    let cutoff = (train - end * train).round();
    let kept = timesteps.iter().filter(|&&t| t >= cutoff).count().max(1);
    timesteps[..kept.min(timesteps.len())].to_vec()
}

/// Inputs that stay fixed for every iteration.
struct Conditioned<T> {
    prompt_embeds: T,
    pooled: T,
    time_ids: T,
}

pub struct DenoiseLoop<'p, B: Backend> {
    pipeline: &'p mut Pipeline<B>,
    options: LoopOptions,
}

impl<'p, B: Backend> DenoiseLoop<'p, B> {
    pub fn new(pipeline: &'p mut Pipeline<B>, options: LoopOptions) -> Self {
        Self { pipeline, options }
    }

    /// Run one generation, sending every update to `sink` in step order.
    pub async fn run<S>(&mut self, params: &ResolvedParams, sink: &mut S) -> Result<LoopReport>
    where
        S: UpdateSink + ?Sized,
    {
        let mut state = LoopState::Initializing;
        let result = self.drive(params, sink, &mut state).await;
        if let Err(e) = &result {
            let at = state.current_step();
            state = state.next(LoopEvent::Error).unwrap_or(LoopState::Failed);
            warn!(error = %e, step = ?at, ?state, "denoising loop failed");
        }
        result
    }

    async fn drive<S>(
        &mut self,
        params: &ResolvedParams,
        sink: &mut S,
        state: &mut LoopState,
    ) -> Result<LoopReport>
    where
        S: UpdateSink + ?Sized,
    {
        let started = Instant::now();
        let backend = self.pipeline.backend.clone();

        let mut scheduler = build_scheduler::<B>(&self.pipeline.scheduler)?;
        scheduler.set_timesteps(params.steps)?;
        let full_len = scheduler.timesteps().len();
        let order = scheduler.order();
        let timesteps = apply_denoising_end(
            scheduler.timesteps(),
            self.options.denoising_end,
            scheduler.num_train_timesteps(),
        );
        let total = timesteps.len();
        let cadence = CadencePolicy::new(
            total,
            order,
            CadencePolicy::warmup_steps(full_len, params.steps, order),
            params.callback_steps,
            params.callback_start,
        );

        let do_guidance = params.do_guidance();
        let conditioned = self.condition(params, do_guidance)?;
        let combiner =
            GuidanceCombiner::new(params.guidance_scale as f32, self.options.guidance_rescale);

        let seed = params.seed.unwrap_or_else(|| OsRng.next_u64());
        let mut latents = self.initial_latents(params, seed, scheduler.init_noise_sigma())?;

        info!(
            seed,
            steps = params.steps,
            executed = total,
            rows = params.rows(),
            guidance = do_guidance,
            "starting denoising loop"
        );
        *state = state.next(LoopEvent::Initialized { total_steps: total })?;

        let mut report = LoopReport {
            executed_steps: 0,
            emitted: 0,
            decoded: 0,
            seed,
        };

        while let Some(i) = state.current_step() {
            self.check_cancelled(i)?;
            let t = timesteps[i];

            let model_input = if do_guidance {
                backend.cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(&backend, &model_input, t)?;

            let noise_pred = self.pipeline.denoiser.predict(&NoiseInput {
                latents: &model_input,
                timestep: t,
                encoder_hidden_states: &conditioned.prompt_embeds,
                text_embeds: &conditioned.pooled,
                time_ids: &conditioned.time_ids,
            })?;
            let noise_pred = if do_guidance {
                let halves = backend.chunk(&noise_pred, 2)?;
                combiner.combine(&backend, &halves[0], &halves[1])?
            } else {
                noise_pred
            };

            latents = scheduler.step(&backend, &noise_pred, t, &latents)?;
            report.executed_steps += 1;

            let action = match state {
                LoopState::Finalizing(_) => StepAction::Terminal,
                _ => cadence.action(i),
            };
            debug!(step = i, timestep = t, ?action, "step complete");

            match action {
                StepAction::Skip => {}
                StepAction::SilentTick => {
                    sink.send(StepUpdate::SilentTick { step: i }).await?;
                    report.emitted += 1;
                }
                StepAction::Preview | StepAction::Terminal => {
                    let terminal = action == StepAction::Terminal;
                    let artifacts = self.decode(&latents, i, terminal)?;
                    report.decoded += 1;
                    sink.send(StepUpdate::Full {
                        step: i,
                        artifacts,
                        terminal,
                    })
                    .await?;
                    report.emitted += 1;
                }
            }

            *state = state.next(LoopEvent::StepCompleted { total_steps: total })?;
            tokio::task::yield_now().await;
        }

        backend.synchronize()?;
        if *state != LoopState::Done {
            return Err(LumenError::Internal(format!(
                "loop stopped in state {state:?}"
            )));
        }
        info!(
            seed,
            executed = report.executed_steps,
            emitted = report.emitted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "denoising loop finished"
        );
        Ok(report)
    }

    fn check_cancelled(&self, step: usize) -> Result<()> {
        if let Some(deadline) = self.options.deadline {
            if Instant::now() >= deadline {
                return Err(LumenError::Cancelled(format!(
                    "session deadline passed before step {step}"
                )));
            }
        }
        if let Some(cancel) = &self.options.cancel {
            if *cancel.borrow() {
                return Err(LumenError::Cancelled(format!(
                    "server shutting down before step {step}"
                )));
            }
        }
        Ok(())
    }

    /// Encode prompts and lay out the fixed per-step inputs, negative rows
    /// first under guidance.
    fn condition(
        &self,
        params: &ResolvedParams,
        do_guidance: bool,
    ) -> Result<Conditioned<B::Tensor>> {
        let backend = &self.pipeline.backend;
        let Conditioning {
            prompt_embeds,
            negative_prompt_embeds,
            pooled_prompt_embeds,
            negative_pooled_prompt_embeds,
        } = self
            .pipeline
            .conditioner
            .encode(&params.positive, &params.negative, params.samples)?;

        let rows = params.rows();
        if prompt_embeds.batch() != rows || pooled_prompt_embeds.batch() != rows {
            return Err(LumenError::Oracle(format!(
                "conditioner returned {} rows, expected {rows}",
                prompt_embeds.batch()
            )));
        }

        let ids = params.size.time_ids();
        let time_rows = if do_guidance { 2 * rows } else { rows };
        let time_ids: Vec<f32> = ids.iter().copied().cycle().take(6 * time_rows).collect();
        let time_ids = backend.copy_from_host_f32(&time_ids, &[time_rows, 6])?;

        if do_guidance {
            Ok(Conditioned {
                prompt_embeds: backend.cat(&[&negative_prompt_embeds, &prompt_embeds], 0)?,
                pooled: backend.cat(&[&negative_pooled_prompt_embeds, &pooled_prompt_embeds], 0)?,
                time_ids,
            })
        } else {
            Ok(Conditioned {
                prompt_embeds,
                pooled: pooled_prompt_embeds,
                time_ids,
            })
        }
    }

    fn initial_latents(
        &self,
        params: &ResolvedParams,
        seed: u64,
        init_noise_sigma: f32,
    ) -> Result<B::Tensor> {
        let model = &self.pipeline.model;
        let shape = [
            params.rows(),
            model.latent_channels,
            params.height / model.vae_scale_factor,
            params.width / model.vae_scale_factor,
        ];
        let numel: usize = shape.iter().product();
        if let Some(latents) = &self.options.latents {
            if latents.len() != numel {
                return Err(LumenError::ShapeMismatch {
                    expected: shape.to_vec(),
                    got: vec![latents.len()],
                });
            }
            return self.pipeline.backend.copy_from_host_f32(latents, &shape);
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let noise: Vec<f32> = (0..numel)
            .map(|_| rng.sample::<f32, _>(StandardNormal) * init_noise_sigma)
            .collect();
        self.pipeline.backend.copy_from_host_f32(&noise, &shape)
    }

    fn decode(
        &mut self,
        latents: &B::Tensor,
        step: usize,
        terminal: bool,
    ) -> Result<Vec<lumen_core::Artifact>> {
        let started = Instant::now();
        let pipeline = &mut *self.pipeline;
        let backend = &pipeline.backend;
        let scaled = backend.mul_scalar(latents, 1.0 / pipeline.model.vae_scaling_factor)?;

        let images = {
            let guard = UpcastGuard::new(pipeline.decoder.as_mut())?;
            if guard.is_upcast() {
                debug!(step, "decoder upcast to f32");
            }
            guard.decode(&scaled)?
        };
        let images = pipeline.decoder.apply_watermark(images)?;
        let artifacts = self
            .options
            .postprocess
            .artifacts(backend, &images, terminal)?;

        info!(
            step,
            terminal,
            images = artifacts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "decoded step"
        );
        Ok(artifacts)
    }
}
