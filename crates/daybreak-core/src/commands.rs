use std::sync::Arc;

use anyhow::Context;
use daybreak_shared::{TaskIdArg, TaskToggleArgs, TitleSuggestArgs};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::cli::Command;
use crate::config::Config;
use crate::datetime::{format_iso_date, resolve_date_expr};
use crate::notify::{LogNotifier, NotificationScheduler};
use crate::render::Renderer;
use crate::service::TaskService;
use crate::view::{SortMode, TaskView, sort_for_manage};

#[instrument(skip(service, cfg, renderer, command))]
pub fn dispatch(
    service: Arc<TaskService>,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Option<Command>,
) -> anyhow::Result<()> {
    let command = command.unwrap_or(Command::Day {
        date: None,
        sort: None,
        json: false,
    });

    match command {
        Command::Add(args) => {
            info!("command add");
            let id = service.add_task(args.to_create())?;
            println!("Created task {id}.");
        }
        Command::Day { date, sort, json } => {
            cmd_day(&service, cfg, renderer, date.as_deref(), sort.as_deref(), json)?;
        }
        Command::List { json } => cmd_list(&service, renderer, json)?,
        Command::Toggle { id, date } => {
            info!(task_id = id, "command toggle");
            let date = match date {
                Some(raw) => resolve_date_expr(&raw, service.today())?,
                None => service.today(),
            };
            let completed = service
                .toggle_task(TaskToggleArgs {
                    task_id: id,
                    date: format_iso_date(date),
                })
                .with_context(|| format!("failed to toggle task {id}"))?;
            if completed {
                println!("Completed task {id}.");
            } else {
                println!("Reopened task {id}.");
            }
        }
        Command::Delete { id } => {
            info!(task_id = id, "command delete");
            service.delete_task(TaskIdArg { task_id: id })?;
            println!("Deleted task {id}.");
        }
        Command::Suggest { query } => {
            for title in service.suggest_titles(TitleSuggestArgs { query })? {
                println!("{title}");
            }
        }
        Command::Watch { once } => cmd_watch(service, cfg, once)?,
    }

    Ok(())
}

fn cmd_day(
    service: &TaskService,
    cfg: &Config,
    renderer: &mut Renderer,
    date: Option<&str>,
    sort: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    info!("command day");

    let now = service.now();
    let date = match date {
        Some(raw) => resolve_date_expr(raw, now.date())?,
        None => now.date(),
    };
    let mode = match sort {
        Some(raw) => raw.parse::<SortMode>()?,
        None => cfg.sort_mode(),
    };

    let mut views = service.tasks_for_date(date)?;
    mode.apply(&mut views);

    if json {
        let dtos: Vec<_> = views.iter().map(TaskView::to_dto).collect();
        println!("{}", serde_json::to_string_pretty(&dtos)?);
        return Ok(());
    }

    renderer.print_day(date, &views, now)
}

fn cmd_list(service: &TaskService, renderer: &mut Renderer, json: bool) -> anyhow::Result<()> {
    info!("command list");

    let mut tasks = service.all_tasks()?;
    sort_for_manage(&mut tasks);

    if json {
        let dtos: Vec<_> = tasks.iter().map(|t| t.to_dto()).collect();
        println!("{}", serde_json::to_string_pretty(&dtos)?);
        return Ok(());
    }

    renderer.print_task_list(&tasks)
}

fn cmd_watch(service: Arc<TaskService>, cfg: &Config, once: bool) -> anyhow::Result<()> {
    info!(once, "command watch");

    let notifier = Arc::new(LogNotifier::new(service.clock()));
    let scheduler = NotificationScheduler::new(service, notifier)
        .with_tick_interval(cfg.tick_interval())
        .with_app_name(cfg.app_name());

    if once {
        let sent = scheduler.tick()?;
        info!(sent, "single notification check finished");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        wait_for_shutdown_signal().await;
        warn!("received shutdown signal; stopping scheduler");
        cancel.cancel();

        if let Err(err) = handle.await {
            error!(error = %err, "scheduler task ended abnormally");
        }
    });

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(error) => {
            error!(%error, "failed to register SIGINT handler; falling back to ctrl_c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            error!(%error, "failed to register SIGTERM handler; falling back to ctrl_c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed waiting for ctrl_c signal");
    }
}
