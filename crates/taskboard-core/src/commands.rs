use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::blobs::DirBlobStore;
use crate::board::{Board, Collaborators, ImageChange, ImageUpload, NoticeLevel, TaskDraft, TaskEdit};
use crate::cli::{Command, ListArgs};
use crate::config::Config;
use crate::datastore::JsonlTaskStore;
use crate::datetime::{Calendar, parse_date_expr};
use crate::drag::{DropEvent, DropPlan, DropSlot, IgnoreReason, ViewKind};
use crate::filter::{DateFilter, DateFilterKind};
use crate::render::Renderer;
use crate::session::SessionIdentity;
use crate::store::IdentityProvider;
use crate::task::{TaskId, User, UserId};

/// Everything a command needs: the configured board plus the local
/// session it was built from.
pub struct CommandContext {
    pub cfg: Config,
    pub renderer: Renderer,
    pub session: Arc<SessionIdentity>,
    pub board: Board,
}

impl CommandContext {
    #[instrument(skip(cfg, data_dir))]
    pub fn open(cfg: Config, data_dir: &Path) -> anyhow::Result<Self> {
        let calendar = Calendar::from_config(&cfg)?;
        let renderer = Renderer::new(&cfg);

        let store = JsonlTaskStore::open(data_dir)
            .with_context(|| format!("failed to open task store at {}", data_dir.display()))?;
        let session = Arc::new(SessionIdentity::open(data_dir)?);
        let bucket = cfg.get_or("storage.bucket", "todo-images");
        let public_base = cfg.get("storage.public_url");
        let blobs = DirBlobStore::open(data_dir, &bucket, public_base.as_deref())?;

        let board = Board::new(
            Collaborators {
                store: Arc::new(store),
                identity: session.clone(),
                blobs: Arc::new(blobs),
            },
            calendar,
        );

        Ok(Self {
            cfg,
            renderer,
            session,
            board,
        })
    }

    fn default_view(&self) -> anyhow::Result<ViewKind> {
        self.cfg.get_or("default.view", "status").parse()
    }
}

#[instrument(skip(ctx, command))]
pub async fn dispatch(ctx: &mut CommandContext, command: Option<Command>) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = command.unwrap_or(Command::List(ListArgs::default()));
    debug!(?command, "dispatching command");

    let result = match command {
        Command::Login { user_id, email } => cmd_login(ctx, user_id, email),
        Command::Logout => cmd_logout(ctx).await,
        Command::Whoami => cmd_whoami(ctx).await,
        other => run_board_command(ctx, other, now).await,
    };

    let notices = ctx.board.take_notices();
    let shown: Vec<_> = notices
        .into_iter()
        .filter(|notice| result.is_ok() || notice.level != NoticeLevel::Error)
        .collect();
    ctx.renderer.print_notices(io::stderr().lock(), &shown)?;
    result
}

async fn run_board_command(
    ctx: &mut CommandContext,
    command: Command,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    ctx.board.load(now).await?;

    match command {
        Command::Add {
            title,
            description,
            due,
            image,
        } => cmd_add(ctx, title, description, due, image.as_deref(), now).await,
        Command::Edit {
            id,
            title,
            description,
            due,
            no_due,
            image,
            remove_image,
        } => {
            let id = resolve_task_id(&ctx.board, &id)?;
            let due = match (due, no_due) {
                (_, true) => Some(None),
                (Some(expr), false) => Some(Some(parse_due(ctx, &expr, now)?)),
                (None, false) => None,
            };
            let image = match (image, remove_image) {
                (_, true) => ImageChange::Remove,
                (Some(path), false) => ImageChange::Replace(read_image(&path)?),
                (None, false) => ImageChange::Keep,
            };
            cmd_edit(ctx, &id, title, description, due, image, now).await
        }
        Command::Show { id } => {
            let id = resolve_task_id(&ctx.board, &id)?;
            let task = ctx
                .board
                .mirror()
                .get(&id)
                .ok_or_else(|| anyhow!("task not found: {id}"))?;
            ctx.renderer
                .print_task_info(io::stdout().lock(), task, ctx.board.calendar(), now)
        }
        Command::Done { id } => cmd_set_completed(ctx, &id, true, now).await,
        Command::Reopen { id } => cmd_set_completed(ctx, &id, false, now).await,
        Command::Delete { id } => {
            let id = resolve_task_id(&ctx.board, &id)?;
            ctx.board.delete_task(&id).await?;
            println!("Deleted task {}.", id.short());
            Ok(())
        }
        Command::List(args) => cmd_list(ctx, args, now).await,
        Command::Move {
            id,
            from,
            to,
            view,
            index,
        } => cmd_move(ctx, &id, from, to, view, index, now).await,
        Command::Login { .. } | Command::Logout | Command::Whoami => {
            Err(anyhow!("not a board command"))
        }
    }
}

fn cmd_login(ctx: &mut CommandContext, user_id: String, email: Option<String>) -> anyhow::Result<()> {
    info!("command login");
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(anyhow!("user id cannot be empty"));
    }
    let user = User {
        id: UserId::from(user_id),
        email,
    };
    ctx.session.sign_in(&user)?;
    println!("Signed in as {}.", user.id);
    Ok(())
}

async fn cmd_logout(ctx: &mut CommandContext) -> anyhow::Result<()> {
    info!("command logout");
    ctx.board.sign_out().await?;
    Ok(())
}

async fn cmd_whoami(ctx: &mut CommandContext) -> anyhow::Result<()> {
    match ctx.session.current_user().await? {
        Some(user) => ctx.renderer.print_user(io::stdout().lock(), &user),
        None => {
            println!("Not signed in.");
            Ok(())
        }
    }
}

#[instrument(skip(ctx, description, due, image, now))]
async fn cmd_add(
    ctx: &mut CommandContext,
    title: String,
    description: Option<String>,
    due: Option<String>,
    image: Option<&Path>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");
    let due_date = due.map(|expr| parse_due(ctx, &expr, now)).transpose()?;
    let image = image.map(read_image).transpose()?;

    let draft = TaskDraft {
        title,
        description,
        due_date,
    };
    let task = ctx.board.add_task(draft, image, now).await?;
    println!("Created task {}.", task.id.short());
    Ok(())
}

async fn cmd_edit(
    ctx: &mut CommandContext,
    id: &TaskId,
    title: Option<String>,
    description: Option<String>,
    due: Option<Option<DateTime<Utc>>>,
    image: ImageChange,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(task_id = %id, "command edit");
    let current = ctx
        .board
        .mirror()
        .get(id)
        .ok_or_else(|| anyhow!("task not found: {id}"))?;

    let mut edit = TaskEdit::from_task(current);
    if let Some(title) = title {
        edit.title = title;
    }
    if let Some(description) = description {
        edit.description = Some(description);
    }
    if let Some(due) = due {
        edit.due_date = due;
    }

    ctx.board.edit_task(id, edit, image, now).await?;
    println!("Modified task {}.", id.short());
    Ok(())
}

async fn cmd_set_completed(
    ctx: &mut CommandContext,
    id: &str,
    completed: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let id = resolve_task_id(&ctx.board, id)?;
    info!(task_id = %id, completed, "command set completed");
    if !ctx.board.set_completed(&id, completed, now).await? {
        return Err(anyhow!("task not found: {id}"));
    }
    let verb = if completed { "Completed" } else { "Reopened" };
    println!("{verb} task {}.", id.short());
    Ok(())
}

#[instrument(skip(ctx, args, now))]
async fn cmd_list(ctx: &mut CommandContext, args: ListArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    let view = match &args.view {
        Some(raw) => raw.parse()?,
        None => ctx.default_view()?,
    };
    let kind: DateFilterKind = match &args.filter {
        Some(raw) => raw.parse()?,
        None => DateFilterKind::All,
    };
    let start = args
        .from
        .as_deref()
        .map(|expr| parse_due(ctx, expr, now))
        .transpose()?;
    let end = args
        .to
        .as_deref()
        .map(|expr| parse_due(ctx, expr, now))
        .transpose()?;

    let filter = DateFilter::new(kind).with_bounds(start, end);
    ctx.board.set_view(view);
    ctx.board.set_search(args.search);
    ctx.board.set_filter(filter, now).await?;

    let mut out = io::stdout().lock();
    let cal = *ctx.board.calendar();
    writeln!(out, "{}", ctx.board.filter().label())?;
    match view {
        ViewKind::Status => {
            ctx.renderer
                .print_status_board(&mut out, &ctx.board.status_split(now), &cal, now)
        }
        ViewKind::DueDate => {
            ctx.renderer
                .print_due_board(&mut out, &ctx.board.grouped(now), &cal, now)
        }
    }
}

async fn cmd_move(
    ctx: &mut CommandContext,
    id: &str,
    from: String,
    to: String,
    view: Option<String>,
    index: usize,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let id = resolve_task_id(&ctx.board, id)?;
    let view = match view {
        Some(raw) => raw.parse()?,
        None => ctx.default_view()?,
    };
    ctx.board.set_view(view);

    let event = DropEvent {
        task_id: id.clone(),
        source: DropSlot::new(from, 0),
        destination: Some(DropSlot::new(to, index)),
    };
    match ctx.board.on_drop(&event, now).await? {
        DropPlan::Ignore(IgnoreReason::OverdueTarget) => {
            println!("Tasks cannot be moved into overdue.");
        }
        DropPlan::Ignore(IgnoreReason::MissingTask) => {
            return Err(anyhow!("task not found: {id}"));
        }
        DropPlan::Ignore(_) => println!("Nothing to move."),
        _ => println!("Moved task {}.", id.short()),
    }
    Ok(())
}

fn parse_due(ctx: &CommandContext, expr: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    parse_date_expr(expr, now, ctx.board.calendar())
        .with_context(|| format!("invalid date: {expr}"))
}

fn read_image(path: &Path) -> anyhow::Result<ImageUpload> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("not a file: {}", path.display()))?;
    Ok(ImageUpload::new(file_name, bytes))
}

/// Exact id, or a prefix shared by exactly one task on the board.
pub fn resolve_task_id(board: &Board, raw: &str) -> anyhow::Result<TaskId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!("task id cannot be empty"));
    }

    let tasks = board.mirror().as_slice();
    if let Some(task) = tasks.iter().find(|task| task.id.as_str() == raw) {
        return Ok(task.id.clone());
    }

    let mut matches = tasks.iter().filter(|task| task.id.as_str().starts_with(raw));
    let first = matches
        .next()
        .ok_or_else(|| anyhow!("no task matches id {raw}"))?;
    if matches.next().is_some() {
        return Err(anyhow!("id prefix {raw} is ambiguous"));
    }
    Ok(first.id.clone())
}
