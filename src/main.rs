//! Diffeq Explorer - DAE 模型交互探索
//!
//! 入口：初始化日志、加载配置、启动编排器运行循环，并从 stdin 逐行读取命令。

use std::path::PathBuf;

use anyhow::Context;
use diffeq_explorer::backend::create_backend_from_config;
use diffeq_explorer::config::{load_config, AppConfig};
use diffeq_explorer::core::{ErrorChannel, ModelView};
use diffeq_explorer::{observability, spawn_orchestrator, Intent, Orchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

const HELP: &str = "commands:
  edit <file>          load model source from file
  source               print current model source
  compile              compile current source
  set <i> <v> [dv]     set input i (and its tangent)
  lower <i> <v>        set slider lower bound
  upper <i> <v>        set slider upper bound
  horizon <v>          set integration horizon
  dismiss              dismiss backend error
  show [json]          print model state
  quit";

/// 控制台命令：要么是发给编排器的 Intent，要么是本地动作
#[derive(Debug, PartialEq)]
enum Command {
    Intent(Intent),
    Edit(PathBuf),
    Source,
    Show { json: bool },
    Help,
    Empty,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, args)) = words.split_first() else {
        return Ok(Command::Empty);
    };

    let index = |i: usize| -> Result<usize, String> {
        args.get(i)
            .ok_or_else(|| format!("{head}: missing index"))?
            .parse()
            .map_err(|e| format!("{head}: bad index: {e}"))
    };
    let number = |i: usize| -> Result<f64, String> {
        args.get(i)
            .ok_or_else(|| format!("{head}: missing value"))?
            .parse()
            .map_err(|e| format!("{head}: bad value: {e}"))
    };

    let command = match head {
        "edit" => Command::Edit(PathBuf::from(
            *args.first().ok_or("edit: missing file path")?,
        )),
        "source" => Command::Source,
        "compile" => Command::Intent(Intent::Compile),
        "set" => Command::Intent(Intent::SetInput {
            index: index(0)?,
            value: number(1)?,
            tangent: if args.len() > 2 { Some(number(2)?) } else { None },
        }),
        "lower" => Command::Intent(Intent::SetLowerBound {
            index: index(0)?,
            value: number(1)?,
        }),
        "upper" => Command::Intent(Intent::SetUpperBound {
            index: index(0)?,
            value: number(1)?,
        }),
        "horizon" => Command::Intent(Intent::SetHorizon(number(0)?)),
        "dismiss" => Command::Intent(Intent::DismissInfrastructureError),
        "show" => Command::Show {
            json: args.first() == Some(&"json"),
        },
        "quit" | "exit" => Command::Intent(Intent::Quit),
        "help" => Command::Help,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(command)
}

/// 基础设施错误未关闭前只放行这些命令
fn allowed_while_blocked(command: &Command) -> bool {
    matches!(
        command,
        Command::Intent(Intent::DismissInfrastructureError | Intent::Quit)
            | Command::Source
            | Command::Show { .. }
            | Command::Help
            | Command::Empty
    )
}

fn render(view: &ModelView) -> String {
    let mut s = String::new();
    if view.compiling {
        s.push_str("compiling...\n");
    }
    for channel in [ErrorChannel::Compile, ErrorChannel::Solve] {
        let error = view.error_for(channel);
        s.push_str(&format!("{}\n", channel.panel_title(error)));
        if let Some(e) = error {
            s.push_str(&format!("  {}\n", e));
        }
    }
    if let Some(report) = view.infrastructure_report() {
        s.push_str(&format!(
            "Unexpected error: {} (dismiss to continue)\n  report: {}\n",
            report.message,
            report.report_body()
        ));
    }
    if let Some(defect) = &view.defect {
        s.push_str(&format!("defect: {}\n", defect));
    }

    let Some(generation) = view.generation else {
        s.push_str("no model compiled yet\n");
        return s;
    };
    s.push_str(&format!("generation {}  horizon {}\n", generation, view.horizon));
    for input in &view.inputs {
        let (lo, hi) = input.range();
        s.push_str(&format!(
            "  input[{}] = {} in [{}, {}] step {} range ({}, {})\n",
            input.index,
            input.value,
            input.lower_bound,
            input.upper_bound,
            input.step(),
            lo,
            hi
        ));
    }
    for series in &view.series {
        let points: Vec<String> = series
            .points
            .iter()
            .map(|p| match p.tangent {
                Some(d) => format!("({}, {} +/- {})", p.time, p.value, d),
                None => format!("({}, {})", p.time, p.value),
            })
            .collect();
        s.push_str(&format!("  out{}: {}\n", series.output_index, points.join(" ")));
    }
    s
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let backend = create_backend_from_config(&cfg);
    let orchestrator = Orchestrator::from_config(&cfg);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, shutting down");
                shutdown.cancel();
            }
        });
    }

    let (intent_tx, mut view_rx, task) =
        spawn_orchestrator(orchestrator, backend, shutdown.clone());
    intent_tx
        .send(Intent::Compile)
        .context("Orchestrator stopped before the first compile")?;

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                if !view.compiling {
                    print!("{}", render(&view));
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else { break };
                let command = parse_command(&line);
                let blocked = view_rx.borrow().infrastructure_error.is_some();
                if blocked && matches!(&command, Ok(c) if !allowed_while_blocked(c)) {
                    eprintln!("backend error pending: 'dismiss' it first (or 'show', 'source', 'quit')");
                    continue;
                }
                match command {
                    Ok(Command::Intent(intent)) => {
                        let quit = intent == Intent::Quit;
                        intent_tx.send(intent).context("Orchestrator stopped")?;
                        if quit {
                            break;
                        }
                    }
                    Ok(Command::Edit(path)) => match tokio::fs::read_to_string(&path).await {
                        Ok(source) => intent_tx
                            .send(Intent::EditSource(source))
                            .context("Orchestrator stopped")?,
                        Err(e) => eprintln!("Failed to read {}: {}", path.display(), e),
                    },
                    Ok(Command::Source) => println!("{}", view_rx.borrow().source_text),
                    Ok(Command::Show { json: true }) => {
                        let view = view_rx.borrow().clone();
                        println!("{}", serde_json::to_string_pretty(&view)?);
                    }
                    Ok(Command::Show { json: false }) => print!("{}", render(&view_rx.borrow())),
                    Ok(Command::Help) => println!("{HELP}"),
                    Ok(Command::Empty) => {}
                    Err(msg) => eprintln!("{msg}"),
                }
            }
        }
    }

    drop(intent_tx);
    task.await.context("Orchestrator task failed")?;
    Ok(())
}
