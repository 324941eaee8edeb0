/// One line of terminal input.
#[derive(Debug, PartialEq)]
pub enum Command {
    Say(String),
    Servers,
    Server(usize),
    NewServer(String),
    Channels,
    Channel(usize),
    NewChannel(String),
    Dm(String),
    React { index: usize, emoji: String },
    Reply(usize),
    CancelReply,
    Forward { index: usize, channel: String },
    Gif(String),
    Image(String),
    Members,
    Unread,
    Username(String),
    Password { new: String, confirm: String },
    Announce(String),
    AnnounceOff,
    Dismiss,
    Logout,
    Quit,
    Help,
}

pub const HELP: &str = "\
/servers                     list servers
/server <n>                  switch to server n (joins it)
/new-server <name>           create a server
/channels                    list channels
/channel <n>                 switch to channel n
/new-channel <name>          create a channel
/dm <username>               open a direct message
/react <n> <emoji>           toggle a reaction on message n
/reply <n>                   reply to message n with the next line
/cancel-reply                send the next line as a plain message
/forward <n> <channel>       forward message n to a channel by name
/gif <query>                 attach the first matching GIF
/image <query>               attach the first matching image
/members                     list members
/unread                      list unread channels
/username <new>              change your username
/password <new> <confirm>    change your password
/announce <text>             publish the announcement (admins)
/announce-off                hide the announcement (admins)
/dismiss                     hide the announcement for this session
/logout                      sign out and quit
/quit                        quit";

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Say(line.to_string()));
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        Ok(match name {
            "servers" => Self::Servers,
            "server" => Self::Server(index(args)?),
            "new-server" => Self::NewServer(text(args, "a server name")?),
            "channels" => Self::Channels,
            "channel" => Self::Channel(index(args)?),
            "new-channel" => Self::NewChannel(text(args, "a channel name")?),
            "dm" => Self::Dm(text(args, "a username")?),
            "react" => {
                let (n, emoji) = args
                    .split_once(char::is_whitespace)
                    .ok_or("usage: /react <n> <emoji>")?;
                Self::React {
                    index: index(n)?,
                    emoji: text(emoji, "an emoji")?,
                }
            }
            "reply" => Self::Reply(index(args)?),
            "cancel-reply" => Self::CancelReply,
            "forward" => {
                let (n, channel) = args
                    .split_once(char::is_whitespace)
                    .ok_or("usage: /forward <n> <channel>")?;
                Self::Forward {
                    index: index(n)?,
                    channel: text(channel, "a channel name")?,
                }
            }
            "gif" => Self::Gif(text(args, "a search query")?),
            "image" => Self::Image(text(args, "a search query")?),
            "members" => Self::Members,
            "unread" => Self::Unread,
            "username" => Self::Username(text(args, "a username")?),
            "password" => {
                let mut parts = args.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(new), Some(confirm), None) => Self::Password {
                        new: new.to_string(),
                        confirm: confirm.to_string(),
                    },
                    _ => return Err("usage: /password <new> <confirm>".into()),
                }
            }
            "announce" => Self::Announce(text(args, "announcement text")?),
            "announce-off" => Self::AnnounceOff,
            "dismiss" => Self::Dismiss,
            "logout" => Self::Logout,
            "quit" | "exit" => Self::Quit,
            "help" => Self::Help,
            other => return Err(format!("unknown command /{} (try /help)", other)),
        })
    }
}

/// Lists are shown 1-based.
fn index(arg: &str) -> Result<usize, String> {
    match arg.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(format!("expected a list number, got '{}'", arg.trim())),
    }
}

fn text(arg: &str, what: &str) -> Result<String, String> {
    let arg = arg.trim();
    if arg.is_empty() {
        Err(format!("expected {}", what))
    } else {
        Ok(arg.to_string())
    }
}
