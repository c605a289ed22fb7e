use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lumen_backend_cpu::{CpuBackend, CpuTensor};
use lumen_core::{
    Backend, DType, GenerationRequest, LatentDecoder, LumenError, ModelConfig, NoiseInput,
    NoiseOracle, Result, StepUpdate, Tensor, TextPrompt,
};
use lumen_model_reference::load_reference_model;
use lumen_runtime::denoise::apply_denoising_end;
use lumen_runtime::{
    resolve, DenoiseLoop, LoopEvent, LoopOptions, LoopReport, LoopState, ParamLimits, Pipeline,
    ResolvedParams,
};
use lumen_scheduler::{SchedulerConfig, SchedulerKind};
use lumen_transport::ChannelSink;

// ──────────── Test Infrastructure ────────────

fn reference_pipeline(kind: SchedulerKind) -> Pipeline<CpuBackend> {
    let backend = CpuBackend::new();
    let model = ModelConfig::default();
    let scheduler = SchedulerConfig::with_kind(kind);
    let reference = load_reference_model(backend.clone(), &model, &scheduler, false).unwrap();
    Pipeline::new(
        backend,
        model,
        scheduler,
        Box::new(reference.conditioner),
        Box::new(reference.denoiser),
        Box::new(reference.decoder),
    )
}

struct Req {
    steps: i64,
    callback_steps: i64,
    callback_start: i64,
    cfg_scale: f64,
    samples: i64,
    seed: i64,
    size: i64,
    prompts: Vec<(&'static str, f64)>,
}

impl Default for Req {
    fn default() -> Self {
        Self {
            steps: 20,
            callback_steps: 5,
            callback_start: 10,
            cfg_scale: 7.0,
            samples: 1,
            seed: 42,
            size: 64,
            prompts: vec![("a lighthouse at dusk", 1.0), ("blurry", -1.0)],
        }
    }
}

fn params(req: Req) -> ResolvedParams {
    let request = GenerationRequest {
        use_binary: true,
        engine: String::new(),
        steps: req.steps,
        width: req.size,
        height: req.size,
        seed: req.seed,
        cfg_scale: req.cfg_scale,
        samples: req.samples,
        text_prompts: req
            .prompts
            .into_iter()
            .map(|(text, weight)| TextPrompt {
                text: text.into(),
                weight,
            })
            .collect(),
        callback_steps: req.callback_steps,
        callback_start: req.callback_start,
    };
    resolve(&request, &ModelConfig::default(), &ParamLimits::default()).unwrap()
}

async fn run(
    pipeline: &mut Pipeline<CpuBackend>,
    params: &ResolvedParams,
    options: LoopOptions,
) -> (Result<LoopReport>, Vec<StepUpdate>) {
    let (mut sink, mut rx) = ChannelSink::channel(1024);
    let result = DenoiseLoop::new(pipeline, options)
        .run(params, &mut sink)
        .await;
    drop(sink);
    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }
    (result, updates)
}

fn full_steps(updates: &[StepUpdate]) -> Vec<usize> {
    updates
        .iter()
        .filter(|u| u.artifacts().is_some())
        .map(StepUpdate::step)
        .collect()
}

/// Returns zeros and records the batch size of every call.
struct RecordingOracle {
    backend: CpuBackend,
    rows: Arc<Mutex<Vec<usize>>>,
}

impl NoiseOracle for RecordingOracle {
    type T = CpuTensor;

    fn predict(&self, input: &NoiseInput<'_, CpuTensor>) -> Result<CpuTensor> {
        self.rows.lock().unwrap().push(input.latents.batch());
        self.backend
            .allocate_zeros(input.latents.shape(), DType::F32)
    }
}

fn recording_pipeline() -> (Pipeline<CpuBackend>, Arc<Mutex<Vec<usize>>>) {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let rows = Arc::new(Mutex::new(Vec::new()));
    pipeline.denoiser = Box::new(RecordingOracle {
        backend: pipeline.backend.clone(),
        rows: rows.clone(),
    });
    (pipeline, rows)
}

/// Half-precision decoder that always fails, recording the precision it
/// was asked to decode in.
struct FailingDecoder {
    dtype: DType,
    seen: Arc<Mutex<Vec<DType>>>,
}

impl LatentDecoder for FailingDecoder {
    type T = CpuTensor;

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn set_dtype(&mut self, dtype: DType) -> Result<()> {
        self.dtype = dtype;
        Ok(())
    }

    fn force_upcast(&self) -> bool {
        true
    }

    fn decode(&self, _latents: &CpuTensor) -> Result<CpuTensor> {
        self.seen.lock().unwrap().push(self.dtype);
        Err(LumenError::Oracle("decoder exploded".into()))
    }
}

// ──────────── Ordering and cadence ────────────

#[tokio::test]
async fn test_twenty_step_scenario() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let (result, updates) = run(&mut pipeline, &params(Req::default()), LoopOptions::default()).await;
    let report = result.unwrap();

    assert_eq!(report.executed_steps, 20);
    assert_eq!(updates.len(), 20);
    let steps: Vec<usize> = updates.iter().map(StepUpdate::step).collect();
    assert_eq!(steps, (0..20).collect::<Vec<_>>());
    assert_eq!(full_steps(&updates), vec![10, 15, 19]);
    assert_eq!(report.decoded, 3);

    let last = updates.last().unwrap();
    assert!(last.is_terminal());
    assert_eq!(last.artifacts().unwrap().len(), 1);
    assert!(updates[..19].iter().all(|u| !u.is_terminal()));
}

#[tokio::test]
async fn test_every_step_decodes() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let p = params(Req {
        steps: 6,
        callback_steps: 1,
        callback_start: 1,
        ..Default::default()
    });
    let (result, updates) = run(&mut pipeline, &p, LoopOptions::default()).await;
    result.unwrap();
    assert_eq!(full_steps(&updates), vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_only_terminal_carries_artifacts() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let p = params(Req {
        steps: 8,
        callback_steps: 8,
        callback_start: 8,
        ..Default::default()
    });
    let (result, updates) = run(&mut pipeline, &p, LoopOptions::default()).await;
    result.unwrap();
    assert_eq!(full_steps(&updates), vec![7]);
    assert_eq!(updates.len(), 8);
}

#[tokio::test]
async fn test_terminal_has_one_artifact_per_row() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let p = params(Req {
        steps: 3,
        samples: 2,
        prompts: vec![("a fox", 1.0), ("a hare", 1.0)],
        ..Default::default()
    });
    let (result, updates) = run(&mut pipeline, &p, LoopOptions::default()).await;
    result.unwrap();
    let terminal = updates.last().unwrap();
    assert!(terminal.is_terminal());
    assert_eq!(terminal.artifacts().unwrap().len(), 4);
}

#[tokio::test]
async fn test_previews_are_thumbnails_terminal_is_full_size() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let p = params(Req {
        steps: 2,
        callback_steps: 1,
        callback_start: 0,
        size: 512,
        ..Default::default()
    });
    let (result, updates) = run(&mut pipeline, &p, LoopOptions::default()).await;
    result.unwrap();
    let preview = &updates[0].artifacts().unwrap()[0];
    assert_eq!((preview.width, preview.height), (256, 256));
    let terminal = &updates[1].artifacts().unwrap()[0];
    assert_eq!((terminal.width, terminal.height), (512, 512));
    assert_eq!(&terminal.jpeg[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_heun_skips_predictor_entries() {
    let mut pipeline = reference_pipeline(SchedulerKind::HeunDiscrete);
    let p = params(Req {
        steps: 4,
        callback_steps: 1,
        callback_start: 0,
        ..Default::default()
    });
    let (result, updates) = run(&mut pipeline, &p, LoopOptions::default()).await;
    let report = result.unwrap();
    assert_eq!(report.executed_steps, 7);
    let steps: Vec<usize> = updates.iter().map(StepUpdate::step).collect();
    assert_eq!(steps, vec![1, 3, 5, 6]);
    assert!(updates.last().unwrap().is_terminal());
}

#[tokio::test]
async fn test_ddim_runs_to_completion() {
    let mut pipeline = reference_pipeline(SchedulerKind::Ddim);
    let (result, updates) = run(&mut pipeline, &params(Req::default()), LoopOptions::default()).await;
    assert_eq!(result.unwrap().executed_steps, 20);
    assert!(updates.last().unwrap().is_terminal());
}

// ──────────── Guidance ────────────

#[tokio::test]
async fn test_no_guidance_at_scale_one() {
    let (mut pipeline, rows) = recording_pipeline();
    let p = params(Req {
        steps: 4,
        cfg_scale: 1.0,
        samples: 2,
        ..Default::default()
    });
    let (result, _) = run(&mut pipeline, &p, LoopOptions::default()).await;
    result.unwrap();
    assert_eq!(*rows.lock().unwrap(), vec![2, 2, 2, 2]);
}

#[tokio::test]
async fn test_guidance_doubles_batch() {
    let (mut pipeline, rows) = recording_pipeline();
    let p = params(Req {
        steps: 3,
        samples: 2,
        ..Default::default()
    });
    let (result, _) = run(&mut pipeline, &p, LoopOptions::default()).await;
    result.unwrap();
    assert_eq!(*rows.lock().unwrap(), vec![4, 4, 4]);
}

#[tokio::test]
async fn test_guidance_rescale_runs() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let options = LoopOptions {
        guidance_rescale: 0.7,
        ..Default::default()
    };
    let (result, updates) = run(&mut pipeline, &params(Req::default()), options).await;
    result.unwrap();
    assert!(updates.last().unwrap().is_terminal());
}

// ──────────── Early cutoff ────────────

#[test]
fn test_cutoff_threshold() {
    let timesteps: Vec<f64> = (0..10).rev().map(|i| (i * 100 + 1) as f64).collect();
    // threshold = round(1000 - 0.8 * 1000) = 200
    let kept = apply_denoising_end(&timesteps, Some(0.8), 1000);
    assert_eq!(kept, vec![901.0, 801.0, 701.0, 601.0, 501.0, 401.0, 301.0, 201.0]);
    assert_eq!(apply_denoising_end(&timesteps, None, 1000), timesteps);
    assert_eq!(apply_denoising_end(&timesteps, Some(1.0), 1000), timesteps);
    assert_eq!(apply_denoising_end(&timesteps, Some(0.0), 1000), timesteps);
    assert_eq!(apply_denoising_end(&timesteps, Some(0.01), 1000), vec![901.0]);
}

#[test]
fn test_cutoff_monotonic() {
    let timesteps: Vec<f64> = (0..50).rev().map(|i| (i * 20 + 1) as f64).collect();
    let mut previous = usize::MAX;
    for k in (1..100).rev() {
        let end = k as f64 / 100.0;
        let kept = apply_denoising_end(&timesteps, Some(end), 1000).len();
        assert!(kept <= previous, "denoising_end {end} kept {kept} > {previous}");
        previous = kept;
    }
}

#[tokio::test]
async fn test_cutoff_shortens_run() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let options = LoopOptions {
        denoising_end: Some(0.5),
        ..Default::default()
    };
    let (result, updates) = run(&mut pipeline, &params(Req::default()), options).await;
    let report = result.unwrap();
    // 20 leading steps: 951, 901, .., 1. Threshold 500 keeps 10 entries.
    assert_eq!(report.executed_steps, 10);
    let last = updates.last().unwrap();
    assert_eq!(last.step(), report.executed_steps - 1);
    assert!(last.is_terminal());
}

// ──────────── Determinism ────────────

#[tokio::test]
async fn test_fixed_seed_is_bit_identical() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let (a, first) = run(&mut pipeline, &params(Req::default()), LoopOptions::default()).await;
    let (b, second) = run(&mut pipeline, &params(Req::default()), LoopOptions::default()).await;
    assert_eq!(a.unwrap().seed, 42);
    assert_eq!(b.unwrap().seed, 42);
    assert_eq!(first, second);

    let (_, other) = run(
        &mut pipeline,
        &params(Req {
            seed: 43,
            ..Default::default()
        }),
        LoopOptions::default(),
    )
    .await;
    // Intermediate previews still carry seed-dependent noise.
    assert_ne!(first, other);
}

#[tokio::test]
async fn test_supplied_latents_are_used() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let p = params(Req {
        steps: 2,
        ..Default::default()
    });
    let bad = LoopOptions {
        latents: Some(vec![0.0; 3]),
        ..Default::default()
    };
    let (result, updates) = run(&mut pipeline, &p, bad).await;
    assert!(result.is_err());
    assert!(updates.is_empty());

    let good = LoopOptions {
        latents: Some(vec![0.0; 4 * 8 * 8]),
        ..Default::default()
    };
    let (result, _) = run(&mut pipeline, &p, good).await;
    result.unwrap();
}

// ──────────── Failure handling ────────────

#[tokio::test]
async fn test_closed_sink_stops_the_loop() {
    let (mut pipeline, rows) = recording_pipeline();
    let (mut sink, rx) = ChannelSink::channel(1);
    drop(rx);
    let result = DenoiseLoop::new(&mut pipeline, LoopOptions::default())
        .run(&params(Req::default()), &mut sink)
        .await;
    assert!(matches!(result, Err(LumenError::Transport(_))));
    // Step 0 is a silent tick; its failed write stops all further oracle work.
    assert_eq!(rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_decoder_failure_restores_precision() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let seen = Arc::new(Mutex::new(Vec::new()));
    pipeline.decoder = Box::new(FailingDecoder {
        dtype: DType::F16,
        seen: seen.clone(),
    });
    let p = params(Req {
        steps: 3,
        ..Default::default()
    });
    let (result, updates) = run(&mut pipeline, &p, LoopOptions::default()).await;
    assert!(matches!(result, Err(LumenError::Oracle(_))));
    assert_eq!(*seen.lock().unwrap(), vec![DType::F32]);
    assert_eq!(pipeline.decoder.dtype(), DType::F16);
    // Silent ticks before the failing decode were delivered; nothing after.
    assert!(updates.iter().all(|u| u.artifacts().is_none()));
    assert_eq!(updates.len(), 2);
}

#[tokio::test]
async fn test_successful_decode_restores_precision() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    assert_eq!(pipeline.decoder.dtype(), DType::F16);
    let p = params(Req {
        steps: 2,
        ..Default::default()
    });
    let (result, _) = run(&mut pipeline, &p, LoopOptions::default()).await;
    result.unwrap();
    assert_eq!(pipeline.decoder.dtype(), DType::F16);
}

#[tokio::test]
async fn test_deadline_cancels() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let options = LoopOptions {
        deadline: Some(Instant::now() - Duration::from_millis(1)),
        ..Default::default()
    };
    let (result, updates) = run(&mut pipeline, &params(Req::default()), options).await;
    assert!(matches!(result, Err(LumenError::Cancelled(_))));
    assert!(updates.is_empty());
}

#[tokio::test]
async fn test_shutdown_signal_cancels() {
    let mut pipeline = reference_pipeline(SchedulerKind::EulerDiscrete);
    let (tx, rx) = tokio::sync::watch::channel(true);
    let options = LoopOptions {
        cancel: Some(rx),
        ..Default::default()
    };
    let (result, _) = run(&mut pipeline, &params(Req::default()), options).await;
    assert!(matches!(result, Err(LumenError::Cancelled(_))));
    drop(tx);
}

// ──────────── State machine ────────────

#[test]
fn test_state_transitions() {
    let s = LoopState::Initializing
        .next(LoopEvent::Initialized { total_steps: 3 })
        .unwrap();
    assert_eq!(s, LoopState::Stepping(0));
    let s = s.next(LoopEvent::StepCompleted { total_steps: 3 }).unwrap();
    assert_eq!(s, LoopState::Stepping(1));
    let s = s.next(LoopEvent::StepCompleted { total_steps: 3 }).unwrap();
    assert_eq!(s, LoopState::Finalizing(2));
    let s = s.next(LoopEvent::StepCompleted { total_steps: 3 }).unwrap();
    assert_eq!(s, LoopState::Done);
    assert!(s.next(LoopEvent::StepCompleted { total_steps: 3 }).is_err());
}

#[test]
fn test_single_entry_schedule_finalizes_immediately() {
    let s = LoopState::Initializing
        .next(LoopEvent::Initialized { total_steps: 1 })
        .unwrap();
    assert_eq!(s, LoopState::Finalizing(0));
}

#[test]
fn test_error_from_any_running_state() {
    for state in [
        LoopState::Initializing,
        LoopState::Stepping(4),
        LoopState::Finalizing(9),
    ] {
        assert_eq!(state.next(LoopEvent::Error).unwrap(), LoopState::Failed);
    }
    assert!(LoopState::Failed.next(LoopEvent::Error).is_err());
    assert!(LoopState::Initializing
        .next(LoopEvent::StepCompleted { total_steps: 2 })
        .is_err());
    assert!(LoopState::Initializing
        .next(LoopEvent::Initialized { total_steps: 0 })
        .is_err());
}
