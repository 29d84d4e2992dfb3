//! Interactive device picker
//!
//! Waits for Enter, scans with a [`PeerDiscovery`] implementation, lists what
//! it found and returns the connection details of the device the user picks
//! with a single digit key.

use std::collections::VecDeque;
use std::io::{self, Write};

use async_trait::async_trait;
use crossterm::style::Stylize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use netchat_core::{ConnectionInfo, DiscoveryMethod, NetchatError, PeerDiscovery};

pub const SCAN_PROMPT: &str = "Please press 'Enter' to scan for devices";
pub const NO_DEVICES_TEXT: &str =
    "No other listening devices detected please check that the other device is listening and try again";
pub const SELECT_PROMPT: &str = "Please select the device to connect to:";

#[derive(Error, Debug)]
pub enum PickerError {
    #[error("input closed before a device was selected")]
    InputClosed,

    #[error("discovery failed: {0}")]
    Discovery(#[from] NetchatError),

    #[error("terminal IO failed: {0}")]
    Io(#[from] io::Error),
}

// ----------------------------------------------------------------------------
// Key Input
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Char(char),
}

impl Key {
    fn digit(&self) -> Option<usize> {
        match self {
            Key::Char(c) => c.to_digit(10).map(|d| d as usize),
            Key::Enter => None,
        }
    }
}

/// Source of single key presses; `None` means the input has ended
#[async_trait]
pub trait KeySource: Send {
    async fn next_key(&mut self) -> io::Result<Option<Key>>;
}

/// Keys read from a line-buffered reader
///
/// Every character of a line becomes a [`Key::Char`] followed by one
/// [`Key::Enter`] for the line terminator.
pub struct LineKeys<R> {
    reader: R,
    pending: VecDeque<Key>,
}

impl<R> LineKeys<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
        }
    }

    /// Hand the reader back; keys already split from a line are dropped
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> KeySource for LineKeys<R> {
    async fn next_key(&mut self) -> io::Result<Option<Key>> {
        if let Some(key) = self.pending.pop_front() {
            return Ok(Some(key));
        }

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        self.pending.extend(
            line.trim_end_matches(['\r', '\n'])
                .chars()
                .map(Key::Char),
        );
        self.pending.push_back(Key::Enter);
        Ok(self.pending.pop_front())
    }
}

// ----------------------------------------------------------------------------
// Picker
// ----------------------------------------------------------------------------

/// Run the picker until a device is chosen or the input ends
pub async fn pick_device<D, K, W>(
    discovery: &D,
    method: DiscoveryMethod,
    keys: &mut K,
    out: &mut W,
) -> Result<ConnectionInfo, PickerError>
where
    D: PeerDiscovery + ?Sized,
    K: KeySource + ?Sized,
    W: Write,
{
    loop {
        writeln!(out, "{}", SCAN_PROMPT)?;
        out.flush()?;
        if !wait_for_enter(keys).await? {
            continue;
        }
        writeln!(out)?;

        let devices = discovery.discover_peers(method).await?;
        debug!(count = devices.len(), ?method, "discovery finished");
        if devices.is_empty() {
            writeln!(out, "{}", NO_DEVICES_TEXT.red())?;
            continue;
        }

        writeln!(out, "{}", SELECT_PROMPT)?;
        for (i, device) in devices.iter().enumerate() {
            writeln!(out, "{}", format!("\t{}-{}", i, device.name).blue())?;
        }
        out.flush()?;

        let selection = loop {
            let key = keys.next_key().await?.ok_or(PickerError::InputClosed)?;
            if let Some(index) = key.digit().filter(|&d| d < devices.len()) {
                break index;
            }
        };

        let chosen = &devices[selection];
        info!(name = %chosen.name, endpoint = %chosen.endpoint, "device selected");
        return Ok(chosen.connection_info());
    }
}

/// True once Enter is pressed; false when another key asks for a re-prompt
async fn wait_for_enter<K>(keys: &mut K) -> Result<bool, PickerError>
where
    K: KeySource + ?Sized,
{
    match keys.next_key().await? {
        Some(Key::Enter) => Ok(true),
        Some(Key::Char(_)) => Ok(false),
        None => Err(PickerError::InputClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netchat_core::{DiscoveredDevice, Endpoint, StaticDiscovery};

    fn keys(input: &'static str) -> LineKeys<&'static [u8]> {
        LineKeys::new(input.as_bytes())
    }

    fn two_devices() -> StaticDiscovery {
        StaticDiscovery::new(vec![
            DiscoveredDevice::new("alpha", "127.0.0.1:5001".parse().unwrap()),
            DiscoveredDevice::new("beta", "127.0.0.1:5002".parse().unwrap()),
        ])
    }

    #[tokio::test]
    async fn test_line_keys_splits_characters() {
        let mut source = keys("ab\n\n");
        assert_eq!(source.next_key().await.unwrap(), Some(Key::Char('a')));
        assert_eq!(source.next_key().await.unwrap(), Some(Key::Char('b')));
        assert_eq!(source.next_key().await.unwrap(), Some(Key::Enter));
        assert_eq!(source.next_key().await.unwrap(), Some(Key::Enter));
        assert_eq!(source.next_key().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pick_second_device() {
        let mut out = Vec::new();
        let info = pick_device(&two_devices(), DiscoveryMethod::Tcp, &mut keys("\n1\n"), &mut out)
            .await
            .unwrap();

        let expected: Endpoint = "127.0.0.1:5002".parse().unwrap();
        assert_eq!(info.remote_endpoint, expected);
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains(SELECT_PROMPT));
        assert!(printed.contains("\t0-alpha"));
        assert!(printed.contains("\t1-beta"));
    }

    #[tokio::test]
    async fn test_other_keys_reprompt_before_scan() {
        let mut out = Vec::new();
        pick_device(&two_devices(), DiscoveryMethod::Tcp, &mut keys("x\n0\n"), &mut out)
            .await
            .unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches(SCAN_PROMPT).count(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_selection_is_ignored() {
        let mut out = Vec::new();
        let info = pick_device(&two_devices(), DiscoveryMethod::Tcp, &mut keys("\n7q0\n"), &mut out)
            .await
            .unwrap();
        let expected: Endpoint = "127.0.0.1:5001".parse().unwrap();
        assert_eq!(info.remote_endpoint, expected);
    }

    #[tokio::test]
    async fn test_no_devices_rescans_until_input_closes() {
        let mut out = Vec::new();
        let err = pick_device(
            &StaticDiscovery::default(),
            DiscoveryMethod::Tcp,
            &mut keys("\n\n"),
            &mut out,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PickerError::InputClosed));
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches(NO_DEVICES_TEXT).count(), 2);
    }

    #[tokio::test]
    async fn test_discovery_filters_by_method() {
        let mut out = Vec::new();
        let err = pick_device(
            &two_devices(),
            DiscoveryMethod::BluetoothSdp,
            &mut keys("\n"),
            &mut out,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PickerError::InputClosed));
        assert!(String::from_utf8(out).unwrap().contains(NO_DEVICES_TEXT));
    }
}
