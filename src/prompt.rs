use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal, Write};

/// Asks `question` on stderr and reads a yes/no answer from stdin.
///
/// On a terminal an unclear answer asks again. With piped input an unclear
/// answer is an error and end of input counts as "no".
pub fn confirm(question: &str) -> Result<bool> {
    let stdin = io::stdin();
    let interactive = stdin.is_terminal();
    confirm_with(question, &mut stdin.lock(), &mut io::stderr(), interactive)
}

pub fn confirm_with<R: BufRead, W: Write>(
    question: &str,
    input: &mut R,
    output: &mut W,
    interactive: bool,
) -> Result<bool> {
    loop {
        write!(output, "{question} [y/n] ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(false);
        }

        match parse_answer(&line) {
            Some(answer) => return Ok(answer),
            None if interactive => writeln!(output, "please answer y or n")?,
            None => bail!("unrecognised answer '{}'", line.trim()),
        }
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    //  y / yes / n / no, any case
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ask(input: &str, interactive: bool) -> Result<bool> {
        let mut out = Vec::new();
        confirm_with("Do you want to continue?", &mut Cursor::new(input), &mut out, interactive)
    }

    #[test]
    fn accepts_short_and_long_answers() {
        assert!(ask("y\n", false).unwrap());
        assert!(ask("YES\r\n", false).unwrap());
        assert!(!ask("n\n", false).unwrap());
        assert!(!ask(" No \n", false).unwrap());
    }

    #[test]
    fn end_of_input_means_no() {
        assert!(!ask("", false).unwrap());
    }

    #[test]
    fn piped_unclear_answer_fails() {
        assert!(ask("maybe\ny\n", false).is_err());
    }

    #[test]
    fn terminal_unclear_answer_asks_again() {
        let mut out = Vec::new();
        let answer = confirm_with("Continue?", &mut Cursor::new("maybe\ny\n"), &mut out, true).unwrap();
        assert!(answer);

        let shown = String::from_utf8(out).unwrap();
        assert_eq!(shown.matches("Continue? [y/n]").count(), 2);
    }
}
