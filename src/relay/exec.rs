//! Running a command wired to a connection.

use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::schema::ExecConfig;
use crate::error::{RelayError, RelayResult};
use crate::net::Connection;

fn build_command(exec: &ExecConfig) -> RelayResult<Command> {
    if exec.shell {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&exec.command);
        return Ok(cmd);
    }

    let mut parts = exec.command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| RelayError::Unsupported("empty exec command".to_string()))?;
    let mut cmd = Command::new(program);
    cmd.args(parts);
    Ok(cmd)
}

/// Run the command with its stdin fed from the connection and its stdout sent
/// back over it. Stderr stays on the host terminal.
///
/// Returns once the command has exited and its output has been relayed.
pub async fn run_command(exec: &ExecConfig, conn: Connection) -> RelayResult<ExitStatus> {
    let mut cmd = build_command(exec)?;
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(RelayError::Exec)?;
    tracing::info!(command = %exec.command, pid = ?child.id(), peer_addr = %conn.peer(), "Command started");

    let (mut reader, mut writer) = conn.into_split();
    let child_stdin = child.stdin.take();
    let child_stdout = child.stdout.take();

    let feed = tokio::spawn(async move {
        if let Some(mut stdin) = child_stdin {
            if let Err(e) = tokio::io::copy(&mut reader, &mut stdin).await {
                tracing::debug!(error = %e, "Connection to command copy ended");
            }
        }
    });

    let relay_output = async {
        if let Some(mut stdout) = child_stdout {
            tokio::io::copy(&mut stdout, &mut writer).await?;
        }
        writer.shutdown().await
    };

    let (status, relayed) = tokio::join!(child.wait(), relay_output);
    feed.abort();

    let status = status.map_err(RelayError::Exec)?;
    if let Err(e) = relayed {
        tracing::debug!(error = %e, "Command output relay ended early");
    }
    tracing::info!(command = %exec.command, status = %status, "Command exited");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::PeerAddr;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn shell_command_echoes_connection_input() {
        let (local, mut remote) = tokio::io::duplex(256);
        let conn = Connection::new(local, PeerAddr::Other("test".into()));

        remote.write_all(b"ping\n").await.unwrap();
        remote.shutdown().await.unwrap();

        let exec = ExecConfig {
            command: "read line; echo \"got $line\"".into(),
            shell: true,
        };
        let status = run_command(&exec, conn).await.unwrap();
        assert!(status.success());

        let mut out = String::new();
        remote.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "got ping\n");
    }

    #[tokio::test]
    async fn direct_command_splits_arguments() {
        let (local, mut remote) = tokio::io::duplex(256);
        let conn = Connection::new(local, PeerAddr::Other("test".into()));

        let exec = ExecConfig {
            command: "echo one two".into(),
            shell: false,
        };
        run_command(&exec, conn).await.unwrap();

        let mut out = String::new();
        remote.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "one two\n");
    }

    #[tokio::test]
    async fn missing_program_is_exec_error() {
        let (local, _remote) = tokio::io::duplex(16);
        let conn = Connection::new(local, PeerAddr::Other("test".into()));
        let exec = ExecConfig {
            command: "/nonexistent/program".into(),
            shell: false,
        };
        assert!(matches!(
            run_command(&exec, conn).await,
            Err(RelayError::Exec(_))
        ));
    }
}
