use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use promptstudy_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use promptstudy_contracts::conversation::TaskThread;
use promptstudy_contracts::messages::{Message, MessageType, NoticeKind, Sender};
use promptstudy_contracts::models::{ProviderCatalog, DEFAULT_PROVIDER};
use promptstudy_contracts::tasks::{Task, TaskId};
use promptstudy_engine::{
    AiBridge, DispatchError, DispatchReply, Detached, HttpBackend, OpenAiBridge, Participant,
    PendingSend, ProviderDispatcher, SendRejection, SendState, SessionContext, SessionController,
    StudyBackend, StudyConfig, SubmitOutcome,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "promptstudy",
    version,
    about = "Participant client for the AI prompting study"
)]
struct Cli {
    /// Study backend base url (overrides STUDY_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Session storage root, one subdirectory per participant (overrides STUDY_SESSION_DIR).
    #[arg(long, global = true)]
    session_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    /// Print the study's task list.
    Tasks,
    /// Print the registered AI providers.
    Providers,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    participant: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long, default_value = DEFAULT_PROVIDER)]
    provider: String,
    /// Clear session storage (quota counts, submitted tasks) on exit.
    #[arg(long)]
    end_session: bool,
}

enum UiEvent {
    Line(String),
    Closed,
    Reply(PendingSend, Result<DispatchReply, DispatchError>),
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("promptstudy error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = StudyConfig::from_env();
    if let Some(api_url) = cli.api_url.as_deref() {
        config = config.with_api_url(api_url);
    }
    if let Some(session_dir) = cli.session_dir {
        config = config.with_session_dir(session_dir);
    }
    match cli.command {
        Command::Chat(args) => {
            run_chat(config, args)?;
            Ok(0)
        }
        Command::Tasks => run_tasks(&config),
        Command::Providers => {
            print_providers(&ProviderCatalog::default(), None);
            Ok(0)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run_tasks(config: &StudyConfig) -> Result<i32> {
    let backend = HttpBackend::new(config)?;
    let records = backend
        .fetch_tasks()
        .with_context(|| format!("failed to fetch tasks from {}", backend.base_url()))?;
    if records.is_empty() {
        println!("No tasks.");
        return Ok(0);
    }
    for (index, record) in records.into_iter().enumerate() {
        let task = Task::from(record);
        println!(
            "{:>2}. [{}] {} ({})",
            index + 1,
            task.id,
            task.title,
            task.task_type.as_str()
        );
    }
    Ok(0)
}

fn run_chat(config: StudyConfig, args: ChatArgs) -> Result<()> {
    let backend: Arc<dyn StudyBackend> = Arc::new(HttpBackend::new(&config)?);
    let bridge: Arc<dyn AiBridge> = Arc::new(OpenAiBridge::from_env(config.timeout)?);
    if !bridge.is_ready() {
        tracing::warn!("OPENAI_API_KEY is not set; bridge providers will not answer");
    }
    let dispatcher = Arc::new(ProviderDispatcher::new(bridge, Arc::clone(&backend)));

    let display_name = args.name.as_deref().unwrap_or(args.participant.as_str());
    let session = SessionContext::start(
        Participant::new(&args.participant, display_name),
        &config.session_dir,
    )?;
    let mut controller = SessionController::new(session, backend, Detached::threaded());
    if controller.load_tasks() == 0 {
        println!("No tasks could be loaded from {}.", config.api_url);
    }
    let selection = controller.select_provider(&args.provider);
    if let Some(reason) = selection.fallback_reason {
        println!("{reason}");
    }

    let (tx, rx) = mpsc::channel::<UiEvent>();
    spawn_stdin_reader(tx.clone());

    println!(
        "Study chat started for {}. Type /help for commands.",
        controller.session().participant().display_name
    );
    print_active_task(&controller);
    print_prompt()?;

    run_event_loop(&mut controller, &dispatcher, &tx, &rx)?;

    if args.end_session {
        controller.end_session()?;
        println!("Session ended.");
    } else {
        controller.wait_for_side_calls();
    }
    Ok(())
}

/// Pumps input lines and replies until the participant leaves. Leaving with
/// stdin closed or `/quit` still applies every reply already in flight, so
/// each user turn gets its AI message and interaction record.
fn run_event_loop(
    controller: &mut SessionController,
    dispatcher: &Arc<ProviderDispatcher>,
    tx: &mpsc::Sender<UiEvent>,
    rx: &mpsc::Receiver<UiEvent>,
) -> Result<()> {
    let mut closing = false;
    while !(closing && controller.sends_in_flight() == 0) {
        let Ok(event) = rx.recv() else { break };
        match event {
            UiEvent::Closed => closing = true,
            UiEvent::Line(_) if closing => continue,
            UiEvent::Line(line) => closing = !handle_line(controller, dispatcher, tx, &line),
            UiEvent::Reply(pending, result) => {
                let task_id = pending.task_id().clone();
                let message = controller.complete_send(pending, result);
                let on_active = controller
                    .active_task()
                    .is_some_and(|thread| thread.task.id == task_id);
                if on_active {
                    println!("{}", render_message(&message));
                } else {
                    println!("(reply arrived for task {task_id})");
                }
            }
        }
        for failure in controller.side_call_failures() {
            tracing::debug!(%failure, "side call failure acknowledged");
        }
        if closing {
            let pending = controller.sends_in_flight();
            if pending > 0 {
                println!("Waiting for {pending} pending repl(ies)...");
            }
        } else {
            print_prompt()?;
        }
    }
    Ok(())
}

fn spawn_stdin_reader(tx: mpsc::Sender<UiEvent>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            match lines.next() {
                Some(Ok(line)) => {
                    if tx.send(UiEvent::Line(line)).is_err() {
                        return;
                    }
                }
                Some(Err(err)) if err.kind() == ErrorKind::Interrupted => continue,
                Some(Err(_)) | None => {
                    let _ = tx.send(UiEvent::Closed);
                    return;
                }
            }
        }
    });
}

fn print_prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

/// Returns `false` once the participant asks to leave.
fn handle_line(
    controller: &mut SessionController,
    dispatcher: &Arc<ProviderDispatcher>,
    tx: &mpsc::Sender<UiEvent>,
    line: &str,
) -> bool {
    let intent = parse_intent(line);
    match intent.action.as_str() {
        "noop" => {}
        "quit" => return false,
        "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
        "list_tasks" => print_tasks(controller),
        "select_task" => select_task(controller, &intent),
        "list_providers" => print_providers(controller.catalog(), Some(&controller.provider().name)),
        "select_provider" => match intent.arg("provider") {
            Some(name) => {
                let selection = controller.select_provider(name);
                match selection.fallback_reason {
                    Some(reason) => println!("{reason}"),
                    None => println!("Provider set to {}", selection.provider.name),
                }
            }
            None => println!("/provider requires a name"),
        },
        "set_mode" => {
            match intent.arg("mode").and_then(MessageType::parse) {
                Some(mode) => match controller.set_mode(mode) {
                    Ok(()) => println!("Mode set to {mode}"),
                    Err(err) => println!("{err}"),
                },
                None => println!("/mode expects text or image"),
            }
        }
        "describe_task" => match controller.active_task() {
            Some(thread) => print_task_details(&thread.task),
            None => println!("No task selected."),
        },
        "show_history" => match controller.active_task() {
            Some(thread) => print_history(thread),
            None => println!("No task selected."),
        },
        "submit_task" => match controller.submit_active_task() {
            Some(SubmitOutcome::Submitted) => println!("Task submitted."),
            Some(SubmitOutcome::AlreadySubmitted) => println!("Task was already submitted."),
            Some(SubmitOutcome::Failed { message }) => {
                println!("Submission failed: {message}. You can try /submit again.")
            }
            None => println!("No task selected."),
        },
        "restore_conversation" => {
            let Some(task_id) = controller.active_task().map(|thread| thread.task.id.clone())
            else {
                println!("No task selected.");
                return true;
            };
            let restored = controller.restore_conversation(&task_id);
            println!("Restored {restored} message(s).");
        }
        "unknown" => {
            let command = intent.arg("command").unwrap_or_default();
            println!("Unknown command /{command}. Type /help for commands.");
        }
        _ => {
            let prompt = intent.prompt.clone().unwrap_or_default();
            start_send(controller, dispatcher, tx, &prompt);
        }
    }
    true
}

fn start_send(
    controller: &mut SessionController,
    dispatcher: &Arc<ProviderDispatcher>,
    tx: &mpsc::Sender<UiEvent>,
    prompt: &str,
) {
    controller.set_draft(prompt);
    match controller.begin_send_draft() {
        Ok(pending) => {
            println!("({} is thinking...)", pending.request().provider.name);
            let dispatcher = Arc::clone(dispatcher);
            let tx = tx.clone();
            thread::spawn(move || {
                let result = dispatcher.dispatch(pending.request());
                let _ = tx.send(UiEvent::Reply(pending, result));
            });
        }
        Err(SendRejection::QuotaExceeded { .. }) => {
            let notice = controller
                .active_task()
                .and_then(|thread| thread.notices.last())
                .map(|notice| notice.text.clone());
            if let Some(text) = notice {
                println!("[notice] {text}");
            }
        }
        Err(rejection) => println!("{rejection}"),
    }
}

fn select_task(controller: &mut SessionController, intent: &Intent) {
    let Some(reference) = intent.arg("task") else {
        println!("/task requires a task number or id");
        return;
    };
    let tasks: Vec<Task> = controller.tasks().cloned().collect();
    let Some(task_id) = resolve_task_ref(&tasks, reference) else {
        println!("No task matches '{reference}'.");
        return;
    };
    match controller.select_task(&task_id) {
        Ok(_) => print_active_task(controller),
        Err(err) => println!("{err}"),
    }
}

/// An exact id wins over a list position.
fn resolve_task_ref(tasks: &[Task], reference: &str) -> Option<TaskId> {
    let reference = reference.trim();
    if let Some(task) = tasks.iter().find(|task| task.id.as_str() == reference) {
        return Some(task.id.clone());
    }
    let position = reference.parse::<usize>().ok()?;
    tasks
        .get(position.checked_sub(1)?)
        .map(|task| task.id.clone())
}

fn print_active_task(controller: &SessionController) {
    let Some(thread) = controller.active_task() else {
        return;
    };
    println!(
        "Task: {} ({}, mode {}, provider {})",
        thread.task.title,
        thread.task.task_type.as_str(),
        controller.mode(),
        controller.provider().name
    );
    if !thread.task.instructions.trim().is_empty() {
        println!("  {}", thread.task.instructions.trim());
    }
}

fn print_task_details(task: &Task) {
    println!("{}", task.title);
    if !task.instructions.trim().is_empty() {
        println!("Task: {}", task.instructions.trim());
    }
    println!("{}", task.description());
}

fn print_tasks(controller: &mut SessionController) {
    let active = controller.active_task().map(|thread| thread.task.id.clone());
    let tasks: Vec<Task> = controller.tasks().cloned().collect();
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    for (index, task) in tasks.iter().enumerate() {
        let marker = if active.as_ref() == Some(&task.id) { '*' } else { ' ' };
        let mut flags = Vec::new();
        if controller.is_submitted(&task.id) {
            flags.push("submitted".to_string());
        }
        if controller.state(&task.id) == SendState::Sending {
            flags.push("waiting".to_string());
        }
        if task.is_image_task() {
            flags.push(format!(
                "{} image(s) left",
                controller.quota_remaining(&task.id)
            ));
        }
        let suffix = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "{marker}{:>2}. {} ({}){suffix}",
            index + 1,
            task.title,
            task.task_type.as_str()
        );
    }
}

fn print_providers(catalog: &ProviderCatalog, current: Option<&str>) {
    for provider in catalog.list() {
        let marker = if current == Some(provider.name.as_str()) { '*' } else { ' ' };
        println!(
            "{marker} {} ({}, {}) {}",
            provider.name,
            provider.transport,
            provider.capabilities.join("+"),
            provider.model
        );
    }
    println!("{}", image_providers_line(catalog));
}

fn image_providers_line(catalog: &ProviderCatalog) -> String {
    let names: Vec<String> = catalog
        .by_capability("image")
        .into_iter()
        .map(|provider| provider.name)
        .collect();
    if names.is_empty() {
        "No provider can generate images.".to_string()
    } else {
        format!("Image generation: {}", names.join(", "))
    }
}

fn print_history(thread: &TaskThread) {
    if thread.messages.is_empty() && thread.notices.is_empty() {
        println!("No messages yet.");
        return;
    }
    for message in &thread.messages {
        println!("{}", render_message(message));
    }
    for notice in &thread.notices {
        println!("[notice] {}", notice.text);
    }
}

fn render_message(message: &Message) -> String {
    let speaker = match message.sender {
        Sender::User => "you".to_string(),
        Sender::Ai => message.model.clone().unwrap_or_else(|| "ai".to_string()),
    };
    let body = match message.message_type {
        MessageType::Image if message.sender == Sender::Ai => format!("[image] {}", message.content),
        _ => message.content.clone(),
    };
    if message.is_error {
        return format!("{speaker} [error]: {body}");
    }
    if message.notice == Some(NoticeKind::CapabilityMismatch) {
        return format!("{speaker} [notice]: {body}");
    }
    format!("{speaker}: {body}")
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use promptstudy_contracts::messages::{Message, MessageId, MessageType, NoticeKind, Sender};
    use promptstudy_contracts::models::ProviderCatalog;
    use promptstudy_contracts::records::{InteractionRecord, TaskSubmission};
    use promptstudy_contracts::tasks::{Task, TaskId, TaskRecord, TaskType};
    use promptstudy_engine::error::BackendResult;
    use promptstudy_engine::{
        ChatTurn, Detached, Participant, ProviderDispatcher, SessionContext, SessionController,
        StudyBackend, UnavailableBridge,
    };
    use serde_json::{json, Value};

    use super::{image_providers_line, render_message, resolve_task_ref, run_event_loop, UiEvent};

    /// Backend whose chat replies arrive after a short delay.
    #[derive(Default)]
    struct SlowBackend {
        logged: Mutex<Vec<InteractionRecord>>,
    }

    impl StudyBackend for SlowBackend {
        fn fetch_tasks(&self) -> BackendResult<Vec<TaskRecord>> {
            Ok(serde_json::from_value(json!([
                {"id": 4, "title": "Story", "task": "Write a story", "task_type": "text"}
            ]))
            .unwrap())
        }

        fn chat(&self, _messages: &[ChatTurn], _model: &str) -> BackendResult<Value> {
            thread::sleep(Duration::from_millis(150));
            Ok(json!("once upon a time"))
        }

        fn generate_image(&self, _prompt: &str, _model: &str) -> BackendResult<String> {
            Ok("https://img.example/slow.png".to_string())
        }

        fn log_interaction(&self, record: &InteractionRecord) -> BackendResult<()> {
            self.logged.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn submit_task(&self, _submission: &TaskSubmission) -> BackendResult<()> {
            Ok(())
        }

        fn fetch_conversation(
            &self,
            _participant_id: &str,
            _task_id: &TaskId,
        ) -> BackendResult<Vec<Message>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn closing_input_waits_for_replies_in_flight() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(SlowBackend::default());
        let dispatcher = Arc::new(ProviderDispatcher::new(
            Arc::new(UnavailableBridge),
            backend.clone(),
        ));
        let session = SessionContext::start(Participant::new("P-9", "Di"), temp.path())?;
        let mut controller = SessionController::new(session, backend.clone(), Detached::inline());
        controller.load_tasks();
        controller.select_provider("Gemini");

        let (tx, rx) = mpsc::channel();
        tx.send(UiEvent::Line("tell me a story".to_string())).unwrap();
        tx.send(UiEvent::Closed).unwrap();
        run_event_loop(&mut controller, &dispatcher, &tx, &rx)?;

        assert_eq!(controller.sends_in_flight(), 0);
        let thread = controller.thread(&TaskId::from(4)).unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[1].sender, Sender::Ai);
        assert_eq!(thread.messages[1].content, "once upon a time");
        assert_eq!(backend.logged.lock().unwrap().len(), 1);
        Ok(())
    }

    #[test]
    fn quit_ignores_later_lines_but_keeps_the_pending_reply() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(SlowBackend::default());
        let dispatcher = Arc::new(ProviderDispatcher::new(
            Arc::new(UnavailableBridge),
            backend.clone(),
        ));
        let session = SessionContext::start(Participant::new("P-9", "Di"), temp.path())?;
        let mut controller = SessionController::new(session, backend.clone(), Detached::inline());
        controller.load_tasks();
        controller.select_provider("Gemini");

        let (tx, rx) = mpsc::channel();
        tx.send(UiEvent::Line("tell me a story".to_string())).unwrap();
        tx.send(UiEvent::Line("/quit".to_string())).unwrap();
        tx.send(UiEvent::Line("never sent".to_string())).unwrap();
        run_event_loop(&mut controller, &dispatcher, &tx, &rx)?;

        let thread = controller.thread(&TaskId::from(4)).unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(backend.logged.lock().unwrap().len(), 1);
        Ok(())
    }

    fn tasks() -> Vec<Task> {
        vec![
            Task::new("intro", "Warm-up", TaskType::Text),
            Task::new(7, "Poster", TaskType::Image),
            Task::new(1, "Vacation", TaskType::Image),
        ]
    }

    #[test]
    fn task_refs_match_ids_before_positions() {
        let tasks = tasks();
        assert_eq!(resolve_task_ref(&tasks, "intro"), Some(TaskId::new("intro")));
        assert_eq!(resolve_task_ref(&tasks, "1"), Some(TaskId::from(1)));
        assert_eq!(resolve_task_ref(&tasks, "2"), Some(TaskId::from(7)));
        assert_eq!(resolve_task_ref(&tasks, "0"), None);
        assert_eq!(resolve_task_ref(&tasks, "9"), None);
    }

    #[test]
    fn rendered_messages_mark_errors_and_notices() {
        let error = Message::ai_error(MessageId(1), "HTTP error! status: 500", "Gemini");
        assert_eq!(
            render_message(&error),
            "Gemini [error]: Error: HTTP error! status: 500"
        );

        let notice = Message::ai(
            MessageId(2),
            "Claude can't generate images.".to_string(),
            MessageType::Text,
            "Claude",
        )
        .with_notice(NoticeKind::CapabilityMismatch);
        assert_eq!(
            render_message(&notice),
            "Claude [notice]: Claude can't generate images."
        );

        let image = Message::ai(
            MessageId(3),
            "https://img.example/a.png".to_string(),
            MessageType::Image,
            "GPT-4o",
        );
        assert_eq!(render_message(&image), "GPT-4o: [image] https://img.example/a.png");
    }

    #[test]
    fn provider_listing_names_image_capable_providers() {
        assert_eq!(
            image_providers_line(&ProviderCatalog::default()),
            "Image generation: GPT-4o, Gemini"
        );
    }
}
