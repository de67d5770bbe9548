#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg: Option<&'static str>,
}

pub(crate) const ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "task",
        action: "select_task",
        arg: Some("task"),
    },
    CommandSpec {
        command: "provider",
        action: "select_provider",
        arg: Some("provider"),
    },
    CommandSpec {
        command: "mode",
        action: "set_mode",
        arg: Some("mode"),
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
        arg: None,
    },
    CommandSpec {
        command: "tasks",
        action: "list_tasks",
        arg: None,
    },
    CommandSpec {
        command: "providers",
        action: "list_providers",
        arg: None,
    },
    CommandSpec {
        command: "describe",
        action: "describe_task",
        arg: None,
    },
    CommandSpec {
        command: "history",
        action: "show_history",
        arg: None,
    },
    CommandSpec {
        command: "submit",
        action: "submit_task",
        arg: None,
    },
    CommandSpec {
        command: "restore",
        action: "restore_conversation",
        arg: None,
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg: None,
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg: None,
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/tasks",
    "/task <n|id>",
    "/providers",
    "/provider <name>",
    "/mode text|image",
    "/describe",
    "/history",
    "/restore",
    "/submit",
    "/quit",
];
