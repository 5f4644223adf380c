//! 模型编排器：主控状态机与运行循环
//!
//! Orchestrator 持有 ModelState，所有修改都经 `apply(Intent)` 进入；编译分两阶段
//! （begin_compile 抓取源码快照 -> 后端异步编译 -> finish_compile 安装新一代）。
//! `spawn_orchestrator` 在后台任务中按顺序消费 Intent，编译在独立任务里进行，
//! 期间仍处理其它 Intent；每次状态变化都通过 watch 通道推送新的 ModelView。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{CompileBackend, CompileFailure, CompiledModel};
use crate::config::{AppConfig, ModelSection};
use crate::core::{ErrorKind, Generation, Intent, ModelError, ModelState, ModelView};

/// 启动时的默认模型：两个输入 r、k，logistic 增长
pub const DEFAULT_SOURCE: &str = "in = [r, k]
r { 1 }
k { 1 }
u_i {
  y = 1,
  z = 0,
}
dudt_i {
    dydt = 0,
    dzdt = 0,
}
F_i {
    dydt,
    0,
}
G_i {
    (r * y) * (1 - (y / k)),
    (2 * y) - z,
}
out_i {
    y,
    z,
}";

/// 一次编译请求：发起时的源码快照
#[derive(Debug, Clone, PartialEq)]
pub struct CompileRequest {
    pub source: String,
}

/// apply 之后调用方需要执行的副作用
#[derive(Debug, PartialEq)]
pub enum Effect {
    None,
    StartCompile(CompileRequest),
    Quit,
}

#[derive(Debug)]
pub struct Orchestrator {
    state: ModelState,
    settings: ModelSection,
    compile_timeout: Duration,
}

impl Orchestrator {
    pub fn new(settings: ModelSection) -> Self {
        Self {
            state: ModelState::new(DEFAULT_SOURCE, settings.horizon),
            settings,
            compile_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(cfg.model.clone())
            .with_compile_timeout(Duration::from_secs(cfg.backend.compile_timeout_secs))
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.state.source_text = source.into();
        self
    }

    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn generation(&self) -> Option<&Generation> {
        self.state.generation.as_ref()
    }

    pub fn view(&self) -> ModelView {
        self.state.project()
    }

    pub fn compile_timeout(&self) -> Duration {
        self.compile_timeout
    }

    /// 唯一的修改入口
    pub fn apply(&mut self, intent: Intent) -> Result<Effect, ModelError> {
        tracing::trace!("Applying intent {}", intent.name());
        match intent {
            Intent::EditSource(text) => {
                self.edit_source(text);
                Ok(Effect::None)
            }
            Intent::Compile => Ok(self
                .begin_compile()
                .map_or(Effect::None, Effect::StartCompile)),
            Intent::SetInput {
                index,
                value,
                tangent,
            } => self.set_input(index, value, tangent).map(|_| Effect::None),
            Intent::SetLowerBound { index, value } => {
                self.set_lower_bound(index, value).map(|_| Effect::None)
            }
            Intent::SetUpperBound { index, value } => {
                self.set_upper_bound(index, value).map(|_| Effect::None)
            }
            Intent::SetHorizon(value) => self.set_horizon(value).map(|_| Effect::None),
            Intent::DismissInfrastructureError => {
                self.dismiss_infrastructure_error();
                Ok(Effect::None)
            }
            Intent::Quit => Ok(Effect::Quit),
        }
    }

    pub fn edit_source(&mut self, text: impl Into<String>) {
        self.state.source_text = text.into();
    }

    /// 进入 Compiling；已在编译中返回 None（不排队、不合并）
    pub fn begin_compile(&mut self) -> Option<CompileRequest> {
        if self.state.compiling {
            tracing::debug!("Compile already in flight, ignoring request");
            return None;
        }
        self.state.compiling = true;
        tracing::info!("Compiling model ({} bytes)", self.state.source_text.len());
        Some(CompileRequest {
            source: self.state.source_text.clone(),
        })
    }

    /// 安装编译结果。结果对应的是发起时的源码快照，即使之后源码又被编辑也照常安装。
    pub fn finish_compile(
        &mut self,
        result: Result<CompiledModel, CompileFailure>,
    ) -> Result<(), ModelError> {
        if !self.state.compiling {
            return Err(ModelError::NotCompiling);
        }

        match result {
            Ok(model) => {
                let settings = ModelSection {
                    horizon: self.state.horizon,
                    ..self.settings.clone()
                };
                let mut generation = Generation::allocate(model, &settings);
                if let Some(old) = self.state.generation.take() {
                    old.release();
                }
                let solved = generation.solve(self.state.horizon);
                tracing::info!(
                    "Installed generation {} ({})",
                    generation.id(),
                    generation.describe()
                );
                self.state.generation = Some(generation);
                self.state.compile_error = None;
                self.state.solve_error = solved.err().map(|e| {
                    tracing::warn!("Initial solve failed: {}", e);
                    e.message
                });
            }
            Err(failure) => match ErrorKind::classify(&failure) {
                ErrorKind::Compile => {
                    tracing::warn!("Model rejected: {}", failure.message);
                    self.state.compile_error = Some(failure.message);
                }
                ErrorKind::Infrastructure => {
                    tracing::error!("Backend failure during compile: {}", failure.message);
                    self.state.infrastructure_error = Some(failure.message);
                }
            },
        }
        self.state.compiling = false;
        Ok(())
    }

    /// begin + 后端编译 + finish；编译期间独占 &mut self
    pub async fn compile(&mut self, backend: &dyn CompileBackend) -> Result<(), ModelError> {
        let Some(request) = self.begin_compile() else {
            return Ok(());
        };
        let result = run_compile(backend, &request.source, self.compile_timeout).await;
        self.finish_compile(result)
    }

    pub fn set_input(
        &mut self,
        index: usize,
        value: f64,
        tangent: Option<f64>,
    ) -> Result<(), ModelError> {
        let generation = self.generation_mut("set_input")?;
        generation.set_input(index, value, tangent)?;
        self.solve();
        Ok(())
    }

    pub fn set_lower_bound(&mut self, index: usize, value: f64) -> Result<(), ModelError> {
        self.generation_mut("set_lower_bound")?
            .set_lower_bound(index, value)
    }

    pub fn set_upper_bound(&mut self, index: usize, value: f64) -> Result<(), ModelError> {
        self.generation_mut("set_upper_bound")?
            .set_upper_bound(index, value)
    }

    pub fn set_horizon(&mut self, value: f64) -> Result<(), ModelError> {
        self.generation_mut("set_horizon")?;
        self.state.horizon = value;
        self.solve();
        Ok(())
    }

    pub fn dismiss_infrastructure_error(&mut self) {
        self.state.infrastructure_error = None;
    }

    fn generation_mut(&mut self, operation: &'static str) -> Result<&mut Generation, ModelError> {
        self.state
            .generation
            .as_mut()
            .ok_or(ModelError::NoModel { operation })
    }

    /// 求解当前代并刷新 solve_error（只反映最近一次求解）
    fn solve(&mut self) {
        let horizon = self.state.horizon;
        let Some(generation) = self.state.generation.as_mut() else {
            return;
        };
        match generation.solve(horizon) {
            Ok(()) => {
                tracing::debug!("Solved generation {} up to t = {}", generation.id(), horizon);
                self.state.solve_error = None;
            }
            Err(e) => {
                tracing::warn!("Solve failed: {}", e);
                self.state.solve_error = Some(e.message);
            }
        }
    }
}

/// 调用后端编译，超时按 BackendFault 处理
pub async fn run_compile(
    backend: &dyn CompileBackend,
    source: &str,
    timeout: Duration,
) -> Result<CompiledModel, CompileFailure> {
    match tokio::time::timeout(timeout, backend.compile(source)).await {
        Ok(result) => result,
        Err(_) => Err(CompileFailure::fault(format!(
            "{} backend did not answer within {:?}",
            backend.name(),
            timeout
        ))),
    }
}

/// 启动编排器运行循环：返回 Intent 发送端、视图接收端与后台任务句柄。
/// 关闭发送端、发送 Intent::Quit 或取消 shutdown 都会结束循环并释放当前代。
pub fn spawn_orchestrator(
    mut orchestrator: Orchestrator,
    backend: Arc<dyn CompileBackend>,
    shutdown: CancellationToken,
) -> (
    mpsc::UnboundedSender<Intent>,
    watch::Receiver<ModelView>,
    JoinHandle<()>,
) {
    let (intent_tx, mut intent_rx) = mpsc::unbounded_channel::<Intent>();
    let (view_tx, view_rx) = watch::channel(orchestrator.view());
    let timeout = orchestrator.compile_timeout();

    let task = tokio::spawn(async move {
        // 编译任务完成后把结果送回本循环，保证缓冲区只在这里被修改
        let (done_tx, mut done_rx) =
            mpsc::unbounded_channel::<Result<CompiledModel, CompileFailure>>();

        loop {
            let defect: Option<String>;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(result) = done_rx.recv() => {
                    match orchestrator.finish_compile(result) {
                        Ok(()) => defect = None,
                        Err(e) => {
                            tracing::error!("Defect: {}", e);
                            defect = Some(e.to_string());
                        }
                    }
                }
                intent = intent_rx.recv() => {
                    let Some(intent) = intent else { break };
                    let name = intent.name();
                    match orchestrator.apply(intent) {
                        Ok(Effect::None) => defect = None,
                        Ok(Effect::StartCompile(request)) => {
                            defect = None;
                            let backend = backend.clone();
                            let done_tx = done_tx.clone();
                            tokio::spawn(async move {
                                let result = run_compile(backend.as_ref(), &request.source, timeout).await;
                                let _ = done_tx.send(result);
                            });
                        }
                        Ok(Effect::Quit) => break,
                        Err(e) => {
                            tracing::error!("Defect in {}: {}", name, e);
                            defect = Some(e.to_string());
                        }
                    }
                }
            }

            let mut view = orchestrator.view();
            view.defect = defect;
            let _ = view_tx.send(view);
        }

        tracing::info!("Orchestrator loop stopped");
    });

    (intent_tx, view_rx, task)
}
