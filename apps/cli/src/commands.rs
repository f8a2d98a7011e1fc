//! Slash commands understood by the terminal front-end.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(String),
    Room(String),
    CreateGroup(String),
    Users,
    Groups,
    History,
    Logout,
    Quit,
    Help,
    Say(String),
    Unknown(String),
}

pub const HELP: &str = "\
/users               list contacts
/groups              list groups
/open <id>           open a conversation with a contact or group
/room <id>           ask the server for a shared room with a contact
/group <name>        create a group
/history             print the open conversation
/logout              forget the stored session and exit
/quit                exit
anything else        send to the open conversation";

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match (name, arg) {
        ("open", id) if !id.is_empty() => Command::Open(id.to_string()),
        ("room", id) if !id.is_empty() => Command::Room(id.to_string()),
        ("group", group_name) => Command::CreateGroup(group_name.to_string()),
        ("users", _) => Command::Users,
        ("groups", _) => Command::Groups,
        ("history", _) => Command::History,
        ("logout", _) => Command::Logout,
        ("quit" | "exit", _) => Command::Quit,
        ("help", _) => Command::Help,
        _ => Command::Unknown(line.to_string()),
    }
}
