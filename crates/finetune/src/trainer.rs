use candle_core::{
    backprop::GradStore,
    utils::{cuda_is_available, metal_is_available},
    DType, Device, Var,
};
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW};

use crate::{
    checkpoint::{self, SaveRequest, TrainerState},
    config::TrainingArguments,
    data::SequenceClassificationDataset,
    errors::{FinetuneError, Result},
    logging::{Logger, TrainLogRecord},
    metrics::{argmax_rows, classification_metrics, LossTracker, MetricMap},
    model::{classification_loss, LoadedModel},
    scheduler::{LRScheduler, LinearWarmupDecay},
};

/// CPU when `no_cuda`, otherwise the first available GPU backend.
pub fn select_device(no_cuda: bool) -> Device {
    if no_cuda {
        println!("device: GPU disabled by --no_cuda; using CPU");
        return Device::Cpu;
    }

    let cuda_available = cuda_is_available();
    let metal_available = metal_is_available();
    println!(
        "device detection: cuda_available={} metal_available={}",
        cuda_available, metal_available
    );

    if metal_available {
        match Device::new_metal(0) {
            Ok(device) => {
                println!("device: using Metal GPU #0");
                device
            }
            Err(err) => {
                eprintln!(
                    "failed to initialize metal device, falling back to CPU: {}",
                    err
                );
                Device::Cpu
            }
        }
    } else if cuda_available {
        match Device::cuda_if_available(0) {
            Ok(device) => {
                println!("device: using CUDA GPU #0");
                device
            }
            Err(err) => {
                eprintln!("cuda reported available but initialization failed: {err}");
                Device::Cpu
            }
        }
    } else {
        eprintln!("no GPU backend available; using CPU");
        Device::Cpu
    }
}

pub fn select_dtype(fp16: bool, device: &Device) -> DType {
    if !fp16 {
        return DType::F32;
    }
    if device.is_cpu() {
        eprintln!("warning: --fp16 is ignored on CPU; training in f32");
        DType::F32
    } else {
        DType::F16
    }
}

/// Seeds the device RNG that draws dropout masks. candle has no seedable
/// CPU generator, so CPU runs return `false` and stay unseeded.
pub fn seed_device(device: &Device, seed: u64) -> Result<bool> {
    if device.is_cpu() {
        return Ok(false);
    }
    device.set_seed(seed)?;
    Ok(true)
}

/// How a training run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutput {
    pub global_step: usize,
    pub training_loss: f64,
    pub interrupted: bool,
}

pub struct Trainer {
    args: TrainingArguments,
    device: Device,
    model: LoadedModel,
    params: Vec<Var>,
    optimizer: AdamW,
    scheduler: LinearWarmupDecay,
    train_dataset: SequenceClassificationDataset,
    eval_dataset: SequenceClassificationDataset,
    logger: Logger,
    state: TrainerState,
}

impl Trainer {
    pub fn new(
        args: TrainingArguments,
        device: Device,
        model: LoadedModel,
        train_dataset: SequenceClassificationDataset,
        eval_dataset: SequenceClassificationDataset,
        logger: Logger,
    ) -> Result<Self> {
        let steps_per_epoch = train_dataset.num_batches(
            args.per_device_train_batch_size,
            args.dataloader_drop_last,
        );
        if steps_per_epoch == 0 {
            return Err(FinetuneError::initialization(format!(
                "training split has {} examples, fewer than one batch of {}",
                train_dataset.len(),
                args.per_device_train_batch_size
            )));
        }
        let max_steps = steps_per_epoch * args.num_train_epochs;

        let params = model.trainable_vars();
        let optimizer = AdamW::new(
            params.clone(),
            ParamsAdamW {
                lr: args.learning_rate,
                beta1: args.adam_beta1,
                beta2: args.adam_beta2,
                eps: args.adam_epsilon,
                weight_decay: args.weight_decay,
            },
        )?;
        let scheduler = LinearWarmupDecay::new(args.learning_rate, args.warmup_steps, max_steps)?;

        if !seed_device(&device, args.seed)? {
            println!("[INFO] CPU dropout masks are not seeded");
        }

        Ok(Self {
            args,
            device,
            model,
            params,
            optimizer,
            scheduler,
            train_dataset,
            eval_dataset,
            logger,
            state: TrainerState {
                max_steps,
                ..TrainerState::default()
            },
        })
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    pub fn model(&self) -> &LoadedModel {
        &self.model
    }

    pub fn train(&mut self) -> Result<TrainOutput> {
        self.train_with_shutdown(|| false)
    }

    /// Runs every epoch unless `should_stop` fires; it is polled before each
    /// optimizer step.
    pub fn train_with_shutdown<F>(&mut self, mut should_stop: F) -> Result<TrainOutput>
    where
        F: FnMut() -> bool,
    {
        let batch_size = self.args.per_device_train_batch_size;
        let drop_last = self.args.dataloader_drop_last;
        let steps_per_epoch = self.train_dataset.num_batches(batch_size, drop_last);

        println!(
            "starting fine-tuning on {:?} (examples={}, steps={})",
            self.device,
            self.train_dataset.len(),
            self.state.max_steps
        );

        let mut tracker = LossTracker::default();
        let mut total_loss = 0.0;
        let mut interrupted = false;

        'epochs: for epoch in 0..self.args.num_train_epochs {
            let shuffle_seed = self.args.seed.wrapping_add(epoch as u64);
            let batches =
                self.train_dataset
                    .batch_indices(batch_size, Some(shuffle_seed), drop_last);

            for (index, indices) in batches.iter().enumerate() {
                if should_stop() {
                    interrupted = true;
                    break 'epochs;
                }

                let batch = self.train_dataset.collate(indices, &self.device)?;
                let logits = self.model.model.forward(&batch, true)?;
                let loss = classification_loss(&logits, &batch.labels)?;
                let loss_value = f64::from(loss.to_scalar::<f32>()?);
                if !loss_value.is_finite() {
                    return Err(FinetuneError::runtime(format!(
                        "non-finite loss at step {}",
                        self.state.global_step + 1
                    )));
                }

                let mut grads = loss.backward()?;
                let grad_norm = clip_gradients(&self.params, &mut grads, self.args.max_grad_norm)?;
                let lr = self.scheduler.step();
                self.optimizer.set_learning_rate(lr);
                self.optimizer.step(&grads)?;

                self.state.global_step += 1;
                self.state.epoch = epoch as f64 + (index + 1) as f64 / steps_per_epoch as f64;
                tracker.record(loss_value);
                total_loss += loss_value;

                let step = self.state.global_step;
                let log_now = (self.args.logging_first_step && step == 1)
                    || step % self.args.logging_steps == 0;
                if log_now {
                    self.log_training(&tracker, grad_norm);
                    tracker.reset();
                }

                let metrics = if step % self.args.eval_steps == 0 {
                    Some(self.evaluate_and_log()?)
                } else {
                    None
                };

                if step % self.args.save_steps == 0 {
                    self.save(metrics.as_ref())?;
                }
            }
        }

        self.logger.flush();
        let steps = self.state.global_step.max(1);
        Ok(TrainOutput {
            global_step: self.state.global_step,
            training_loss: total_loss / steps as f64,
            interrupted,
        })
    }

    /// Loss and classification metrics over `dataset`, keys prefixed with
    /// `eval_`.
    pub fn evaluate(&self, dataset: &SequenceClassificationDataset) -> Result<MetricMap> {
        if dataset.is_empty() {
            return Err(FinetuneError::runtime("cannot evaluate an empty dataset"));
        }

        let mut predictions = Vec::with_capacity(dataset.len());
        let mut loss_sum = 0.0;
        for indices in dataset.batch_indices(self.args.per_device_eval_batch_size, None, false) {
            let batch = dataset.collate(&indices, &self.device)?;
            let logits = self.model.model.forward(&batch, false)?;
            let loss = classification_loss(&logits, &batch.labels)?;
            loss_sum += f64::from(loss.to_scalar::<f32>()?) * batch.size as f64;

            let rows = logits.to_dtype(DType::F32)?.to_vec2::<f32>()?;
            predictions.extend(argmax_rows(&rows));
        }

        let scores = classification_metrics(&predictions, dataset.labels(), self.model.model.num_labels());
        let mut metrics: MetricMap = scores
            .into_iter()
            .map(|(key, value)| (format!("eval_{key}"), value))
            .collect();
        metrics.insert("eval_loss".into(), loss_sum / dataset.len() as f64);
        Ok(metrics)
    }

    fn log_training(&mut self, tracker: &LossTracker, grad_norm: f64) {
        let Some(loss) = tracker.average() else {
            return;
        };
        let record = TrainLogRecord {
            step: self.state.global_step,
            epoch: self.state.epoch,
            loss,
            learning_rate: self.scheduler.learning_rate(),
            grad_norm,
            steps_per_sec: tracker.steps_per_sec(),
        };
        self.logger.log_training_step(&record);
        self.state.log_history.push(MetricMap::from([
            ("step".to_string(), record.step as f64),
            ("epoch".to_string(), record.epoch),
            ("loss".to_string(), record.loss),
            ("learning_rate".to_string(), record.learning_rate),
        ]));
    }

    fn evaluate_and_log(&mut self) -> Result<MetricMap> {
        let mut metrics = self.evaluate(&self.eval_dataset)?;
        metrics.insert("epoch".into(), self.state.epoch);

        let step = self.state.global_step;
        self.logger.log_evaluation(step, &metrics);
        self.logger.flush();

        let mut record = metrics.clone();
        record.insert("step".into(), step as f64);
        self.state.log_history.push(record);
        Ok(metrics)
    }

    /// Writes a checkpoint. When `metrics` come from an evaluation at the
    /// same step, the tracked metric decides whether it is the best so far.
    fn save(&mut self, metrics: Option<&MetricMap>) -> Result<()> {
        let step = self.state.global_step;
        if let Some(metrics) = metrics {
            let key = self.args.metric_key();
            let value = metrics.get(&key).copied().ok_or_else(|| {
                let available: Vec<&str> = metrics.keys().map(String::as_str).collect();
                FinetuneError::runtime(format!(
                    "metric `{key}` not found in evaluation results ({})",
                    available.join(", ")
                ))
            })?;
            if self.state.update_best(value, self.args.greater_is_better) {
                self.state.best_model_checkpoint =
                    Some(checkpoint::checkpoint_dir(&self.args.output_dir, step));
            }
        }

        let descriptor = checkpoint::save_checkpoint(SaveRequest {
            output_dir: &self.args.output_dir,
            model: &self.model,
            args: &self.args,
            state: &self.state,
        })?;
        println!(
            "checkpoint saved at step {} -> {}",
            step,
            descriptor.directory.display()
        );
        Ok(())
    }
}

/// Scales gradients so their global L2 norm is at most `max_norm`. Returns
/// the norm before clipping.
fn clip_gradients(params: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let mut sum_squares = 0.0f64;
    for var in params {
        if let Some(grad) = grads.get(var) {
            let sq = grad
                .to_dtype(DType::F32)?
                .sqr()?
                .sum_all()?
                .to_scalar::<f32>()?;
            sum_squares += f64::from(sq);
        }
    }

    let total_norm = sum_squares.sqrt();
    if total_norm > max_norm {
        let clip_coef = max_norm / (total_norm + 1e-6);
        for var in params {
            if let Some(grad) = grads.remove(var) {
                grads.insert(var, (grad * clip_coef)?);
            }
        }
    }

    Ok(total_norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;

    #[test]
    fn clipping_scales_to_max_norm() {
        let device = Device::Cpu;
        let var = Var::from_tensor(&Tensor::new(&[1.0f32, 1.0], &device).unwrap()).unwrap();
        let loss = (var.as_tensor() * Tensor::new(&[3.0f32, 4.0], &device).unwrap())
            .unwrap()
            .sum_all()
            .unwrap();
        let mut grads = loss.backward().unwrap();

        let params = vec![var.clone()];
        let norm = clip_gradients(&params, &mut grads, 1.0).unwrap();
        assert!((norm - 5.0).abs() < 1e-5);

        let clipped = grads.get(&var).unwrap().to_vec1::<f32>().unwrap();
        assert!((clipped[0] - 0.6).abs() < 1e-4);
        assert!((clipped[1] - 0.8).abs() < 1e-4);
    }

    #[test]
    fn small_gradients_are_untouched() {
        let device = Device::Cpu;
        let var = Var::from_tensor(&Tensor::new(&[1.0f32], &device).unwrap()).unwrap();
        let loss = (var.as_tensor() * 0.5).unwrap().sum_all().unwrap();
        let mut grads = loss.backward().unwrap();

        let norm = clip_gradients(&[var.clone()], &mut grads, 1.0).unwrap();
        assert!((norm - 0.5).abs() < 1e-6);
        assert_eq!(grads.get(&var).unwrap().to_vec1::<f32>().unwrap(), vec![0.5]);
    }

    #[test]
    fn fp16_is_cpu_ignored() {
        assert_eq!(select_dtype(true, &Device::Cpu), DType::F32);
        assert_eq!(select_dtype(false, &Device::Cpu), DType::F32);
        assert!(select_device(true).is_cpu());
    }

    #[test]
    fn cpu_seeding_is_skipped() {
        assert!(!seed_device(&Device::Cpu, 42).unwrap());
    }
}
