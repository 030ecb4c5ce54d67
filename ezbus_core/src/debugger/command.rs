use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case};
use nom::character::complete::{alphanumeric1, char, digit1, hex_digit1, space0, space1};
use nom::combinator::{all_consuming, eof, map, map_res, not, rest, value, verify};
use nom::sequence::{delimited, preceded, terminated, tuple};
use nom::IResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Off,
    Read,
    Write,
    ReadWrite,
}

impl WatchMode {
    /// `(on_read, on_write)`
    pub fn flags(self) -> (bool, bool) {
        match self {
            WatchMode::Off => (false, false),
            WatchMode::Read => (true, false),
            WatchMode::Write => (false, true),
            WatchMode::ReadWrite => (true, true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ShowUsage,
    PrintPorts,
    PrintStats,
    PrintEvents,
    PortAdd(u16),
    PortRemove(u16),
    PortMove(u16, u16),
    Freeze(u16, u8),
    Unfreeze(u16),
    Watch(u16, WatchMode),
    SetValue(u16, u8),
    Export(String),
    Import(String),
    Reset,
    Run,
    Pause,
    Quit,
    RepeatCommand(Box<Command>, u16),
}

impl Command {
    pub fn parse(input: &str) -> Result<Command, String> {
        let line = input.trim();
        match all_consuming(parse_command)(line) {
            Ok((_, command)) => Ok(command),
            Err(err) => Err(format!("Error while parsing command \"{}\": {:?}", line, err)),
        }
    }
}

fn parse_command(input: &str) -> IResult<&str, Command> {
    alt((
        parse_show_usage,
        parse_print_ports,
        parse_print_stats,
        parse_print_events,
        parse_port_add,
        parse_port_remove,
        parse_port_move,
        parse_freeze,
        parse_unfreeze,
        parse_watch,
        parse_set_value,
        parse_export,
        parse_import,
        parse_reset,
        parse_run,
        parse_pause,
        parse_quit,
        parse_repeat_command,
    ))(input)
}

fn parse_show_usage(input: &str) -> IResult<&str, Command> {
    value(
        Command::ShowUsage,
        alt((eof, keyword("help", "?"))),
    )(input)
}

fn parse_print_ports(input: &str) -> IResult<&str, Command> {
    value(Command::PrintPorts, keyword("printports", "pp"))(input)
}

fn parse_print_stats(input: &str) -> IResult<&str, Command> {
    value(Command::PrintStats, keyword("stats", "st"))(input)
}

fn parse_print_events(input: &str) -> IResult<&str, Command> {
    value(Command::PrintEvents, keyword("events", "ev"))(input)
}

fn parse_port_add(input: &str) -> IResult<&str, Command> {
    map(
        preceded(keyword("portadd", "pa"), preceded(space1, parse_literal_u16)),
        Command::PortAdd,
    )(input)
}

fn parse_port_remove(input: &str) -> IResult<&str, Command> {
    map(
        preceded(
            keyword("portremove", "pr"),
            preceded(space1, parse_literal_u16),
        ),
        Command::PortRemove,
    )(input)
}

fn parse_port_move(input: &str) -> IResult<&str, Command> {
    map(
        tuple((
            keyword("portmove", "pm"),
            preceded(space1, parse_literal_u16),
            preceded(space1, parse_literal_u16),
        )),
        |(_, from, to)| Command::PortMove(from, to),
    )(input)
}

fn parse_freeze(input: &str) -> IResult<&str, Command> {
    map(
        tuple((
            keyword("freeze", "fz"),
            preceded(space1, parse_literal_u16),
            preceded(space1, parse_literal_u8),
        )),
        |(_, port, value)| Command::Freeze(port, value),
    )(input)
}

fn parse_unfreeze(input: &str) -> IResult<&str, Command> {
    map(
        preceded(keyword("unfreeze", "uf"), preceded(space1, parse_literal_u16)),
        Command::Unfreeze,
    )(input)
}

fn parse_watch(input: &str) -> IResult<&str, Command> {
    map(
        tuple((
            keyword("watch", "wa"),
            preceded(space1, parse_literal_u16),
            preceded(space1, parse_watch_mode),
        )),
        |(_, port, mode)| Command::Watch(port, mode),
    )(input)
}

fn parse_set_value(input: &str) -> IResult<&str, Command> {
    map(
        tuple((
            keyword("setvalue", "sv"),
            preceded(space1, parse_literal_u16),
            preceded(space1, parse_literal_u8),
        )),
        |(_, port, value)| Command::SetValue(port, value),
    )(input)
}

fn parse_export(input: &str) -> IResult<&str, Command> {
    map(
        preceded(keyword("export", "ex"), preceded(space1, parse_path)),
        Command::Export,
    )(input)
}

fn parse_import(input: &str) -> IResult<&str, Command> {
    map(
        preceded(keyword("import", "im"), preceded(space1, parse_path)),
        Command::Import,
    )(input)
}

fn parse_reset(input: &str) -> IResult<&str, Command> {
    value(Command::Reset, keyword("reset", "rs"))(input)
}

fn parse_run(input: &str) -> IResult<&str, Command> {
    value(Command::Run, keyword("run", "ru"))(input)
}

fn parse_pause(input: &str) -> IResult<&str, Command> {
    value(Command::Pause, keyword("pause", "ps"))(input)
}

fn parse_quit(input: &str) -> IResult<&str, Command> {
    value(Command::Quit, keyword("quit", "q"))(input)
}

fn parse_repeat_command(input: &str) -> IResult<&str, Command> {
    map(
        tuple((
            keyword("repeatcommand", "r"),
            preceded(
                space1,
                delimited(
                    char('('),
                    delimited(space0, parse_command, space0),
                    char(')'),
                ),
            ),
            preceded(space1, parse_literal_u16),
        )),
        |(_, command, count)| Command::RepeatCommand(Box::new(command), count),
    )(input)
}

//
// helpers
//

// Long or short command name, not followed by more letters or digits
fn keyword<'a>(
    long: &'static str,
    short: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(
        alt((tag_no_case(long), tag_no_case(short))),
        not(alphanumeric1),
    )
}

// Rest of the line, spaces included
fn parse_path(input: &str) -> IResult<&str, String> {
    map(verify(rest, |path: &str| !path.trim().is_empty()), |path: &str| {
        path.trim().to_string()
    })(input)
}

fn parse_watch_mode(input: &str) -> IResult<&str, WatchMode> {
    terminated(
        alt((
            value(WatchMode::ReadWrite, tag_no_case("rw")),
            value(WatchMode::Read, tag_no_case("r")),
            value(WatchMode::Write, tag_no_case("w")),
            value(WatchMode::Off, alt((tag_no_case("off"), tag_no_case("none")))),
        )),
        not(alphanumeric1),
    )(input)
}

pub(crate) fn parse_literal_u16(input: &str) -> IResult<&str, u16> {
    map_res(parse_literal_u32, u16::try_from)(input)
}

pub(crate) fn parse_literal_u8(input: &str) -> IResult<&str, u8> {
    map_res(parse_literal_u32, u8::try_from)(input)
}

// `0x10`, `$10` or `16`
fn parse_literal_u32(input: &str) -> IResult<&str, u32> {
    alt((parse_hex_literal_u32, parse_decimal_literal_u32))(input)
}

fn parse_hex_literal_u32(input: &str) -> IResult<&str, u32> {
    preceded(
        alt((tag_no_case("0x"), tag("$"))),
        map_res(hex_digit1, |digits: &str| u32::from_str_radix(digits, 16)),
    )(input)
}

fn parse_decimal_literal_u32(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |digits: &str| digits.parse::<u32>())(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_shows_usage() {
        assert_eq!(Command::parse("\n"), Ok(Command::ShowUsage));
        assert_eq!(Command::parse("help"), Ok(Command::ShowUsage));
    }

    #[test]
    fn long_and_short_names() {
        assert_eq!(Command::parse("printports"), Ok(Command::PrintPorts));
        assert_eq!(Command::parse("PP"), Ok(Command::PrintPorts));
        assert_eq!(Command::parse("pa 0xE010"), Ok(Command::PortAdd(0xE010)));
        assert_eq!(
            Command::parse("portremove $e010"),
            Ok(Command::PortRemove(0xE010))
        );
        assert_eq!(Command::parse("pause"), Ok(Command::Pause));
        assert_eq!(Command::parse("ps"), Ok(Command::Pause));
        assert_eq!(Command::parse("run"), Ok(Command::Run));
        assert_eq!(Command::parse("rs"), Ok(Command::Reset));
        assert_eq!(Command::parse("q"), Ok(Command::Quit));
    }

    #[test]
    fn freeze_and_set_value_take_two_literals() {
        assert_eq!(
            Command::parse("freeze 0xE010 0x99"),
            Ok(Command::Freeze(0xE010, 0x99))
        );
        assert_eq!(
            Command::parse("sv 16 255"),
            Ok(Command::SetValue(16, 255))
        );
        assert_eq!(Command::parse("uf 0x10"), Ok(Command::Unfreeze(0x10)));
    }

    #[test]
    fn watch_modes() {
        assert_eq!(
            Command::parse("watch 0x10 rw"),
            Ok(Command::Watch(0x10, WatchMode::ReadWrite))
        );
        assert_eq!(
            Command::parse("wa 0x10 r"),
            Ok(Command::Watch(0x10, WatchMode::Read))
        );
        assert_eq!(
            Command::parse("wa 0x10 W"),
            Ok(Command::Watch(0x10, WatchMode::Write))
        );
        assert_eq!(
            Command::parse("wa 0x10 off"),
            Ok(Command::Watch(0x10, WatchMode::Off))
        );
        assert_eq!(WatchMode::Write.flags(), (false, true));
    }

    #[test]
    fn port_move_takes_two_addresses() {
        assert_eq!(
            Command::parse("portmove 0xE010 0xE011"),
            Ok(Command::PortMove(0xE010, 0xE011))
        );
        assert_eq!(Command::parse("pm 16 $11"), Ok(Command::PortMove(16, 17)));
        assert!(Command::parse("pm 0x10").is_err());
    }

    #[test]
    fn export_and_import_take_a_path() {
        assert_eq!(
            Command::parse("export /tmp/my ports.bin"),
            Ok(Command::Export("/tmp/my ports.bin".to_string()))
        );
        assert_eq!(
            Command::parse("im ports.bin"),
            Ok(Command::Import("ports.bin".to_string()))
        );
        assert!(Command::parse("export").is_err());
        assert!(Command::parse("import   ").is_err());
    }

    #[test]
    fn repeat_wraps_a_command() {
        assert_eq!(
            Command::parse("r (sv 0x10 0x01) 3"),
            Ok(Command::RepeatCommand(
                Box::new(Command::SetValue(0x10, 0x01)),
                3
            ))
        );
    }

    #[test]
    fn out_of_range_literals_are_rejected() {
        assert!(Command::parse("fz 0x10000 0").is_err());
        assert!(Command::parse("fz 0x10 0x100").is_err());
        assert!(Command::parse("sv 0x10 256").is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(Command::parse("pp now").is_err());
        assert!(Command::parse("printportsx").is_err());
        assert!(Command::parse("pa").is_err());
    }
}
