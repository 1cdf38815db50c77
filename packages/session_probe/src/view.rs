//! Stdout renderings of the display bridges.

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use live_session::bridge::{
    ChatBridge, DisplayBridge, LogEntry, LogTailBridge, TerminalBridge, TerminalSurface, pump,
};
use live_session::protocol::{Role, TerminalSize};
use live_session::{BridgeLimits, SessionEvent, SessionHandle, TimelineItem};

const DEFAULT_SIZE: TerminalSize = TerminalSize { rows: 24, cols: 80 };

struct StdoutSurface;

impl TerminalSurface for StdoutSurface {
    fn write(&mut self, data: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(data.as_bytes());
        let _ = stdout.flush();
    }

    fn reset(&mut self) {
        // Home, clear screen, reset attributes
        self.write("\x1b[H\x1b[2J\x1b[0m");
    }
}

fn note_state(event: &SessionEvent) {
    if let SessionEvent::State(state) = event {
        eprintln!("[{state}]");
    }
}

/// Shell: output to stdout, stdin lines as input.
pub async fn run_terminal(session: &SessionHandle, limits: &BridgeLimits) -> Result<()> {
    let mut bridge = TerminalBridge::new(session.clone(), limits.terminal_scrollback_bytes);
    bridge.attach(Box::new(StdoutSurface));
    bridge.resize(DEFAULT_SIZE);

    let mut events = session.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    note_state(&event);
                    bridge.handle_event(event);
                }
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => bridge.input(&format!("{line}\r")),
                None => stdin_open = false,
            },
            _ = &mut ctrl_c => break,
        }
    }

    if bridge.dropped_inputs() > 0 {
        warn!(dropped = bridge.dropped_inputs(), "some input never reached the shell");
    }
    Ok(())
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

/// Print settled items past `printed`, stopping at the in-flight one.
fn print_settled(items: &[TimelineItem], printed: &mut usize) {
    while let Some(item) = items.get(*printed) {
        if item.is_placeholder {
            break;
        }
        println!("{:>9}: {}", role_label(item.role), item.content);
        *printed += 1;
    }
}

/// Chat: stdin lines are submitted, turns are printed once complete.
pub async fn run_chat(session: &SessionHandle, history: Vec<TimelineItem>) -> Result<()> {
    let mut bridge = ChatBridge::new(session.clone());
    if let Err(e) = bridge.seed(history) {
        warn!(error = %e, "history not applied");
    }
    let mut printed = 0;
    print_settled(bridge.items(), &mut printed);

    let mut events = session.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    note_state(&event);
                    bridge.handle_event(event);
                    for message in bridge.take_undelivered() {
                        eprintln!("[not delivered] {}", message.content);
                    }
                }
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) if !line.trim().is_empty() => {
                    bridge.submit(line.trim());
                }
                Some(_) => {}
                None => stdin_open = false,
            },
            _ = &mut ctrl_c => break,
        }
        print_settled(bridge.items(), &mut printed);
    }
    Ok(())
}

/// Prints each line as the tail accepts it.
struct PrintingTail(LogTailBridge);

impl PrintingTail {
    fn total(&self) -> u64 {
        self.0.len() as u64 + self.0.evicted()
    }

    fn print_last(&self, count: usize) {
        let skip = self.0.len().saturating_sub(count);
        for entry in self.0.entries().skip(skip) {
            println!("{entry}");
        }
    }
}

impl DisplayBridge for PrintingTail {
    fn handle_event(&mut self, event: SessionEvent) {
        note_state(&event);
        let before = self.total();
        self.0.handle_event(event);
        let added = self.total().saturating_sub(before) as usize;
        self.print_last(added);
    }
}

/// Job log and telemetry: print every line until the session ends.
pub async fn run_log_tail(
    session: &SessionHandle,
    limits: &BridgeLimits,
    history: Vec<TimelineItem>,
) -> Result<()> {
    let mut tail = PrintingTail(LogTailBridge::new(
        session.clone(),
        limits.log_tail_max_items,
    ));
    tail.0.seed(
        history
            .into_iter()
            .map(|item| LogEntry::history(item.content, None))
            .collect(),
    );
    tail.print_last(tail.0.len());

    let mut events = session.subscribe();
    tokio::select! {
        handled = pump(&mut events, &mut tail) => info!(events = handled, "stream ended"),
        _ = tokio::signal::ctrl_c() => {}
    }
    if tail.0.evicted() > 0 {
        info!(evicted = tail.0.evicted(), "older lines were evicted");
    }
    Ok(())
}
