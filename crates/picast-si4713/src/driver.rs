//! Si4713 -- the [`Transmitter`] implementation for the Silicon Labs SI4713.
//!
//! This module ties the command builders ([`commands`]) and property
//! layouts ([`properties`]) to a [`Transport`]. It owns the bus for the
//! duration of each semantic operation, polls CTS after every write,
//! retries NACKed writes, and keeps shadow copies of the packed
//! properties so single-field updates do not clobber their neighbours.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use picast_core::config::AudioProcessing;
use picast_core::error::{Error, Result};
use picast_core::limits;
use picast_core::transmitter::Transmitter;
use picast_core::transport::Transport;
use picast_core::types::*;

use crate::commands::{self, STATUS_CTS, STATUS_ERR};
use crate::properties::{self as props};

/// Bus pacing and retry policy, fixed at build time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BusTiming {
    /// Deadline for a single bus read.
    pub read_timeout: Duration,
    /// CTS polls after an ordinary command.
    pub cts_polls: u32,
    /// CTS polls after POWER_UP, which takes longer.
    pub power_up_polls: u32,
    pub cts_interval: Duration,
    /// Total attempts for a NACKed write.
    pub attempts: u32,
    /// Back-off unit; attempt `n` waits `n` units.
    pub retry_backoff: Duration,
}

/// Bus plus the register shadows that must change together with it.
struct Bus {
    transport: Box<dyn Transport>,
    component: u16,
    acomp: u16,
    misc: u16,
}

impl Bus {
    async fn read(&mut self, len: usize, timing: &BusTiming) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self.transport.receive(&mut buf, timing.read_timeout).await?;
        if n < len {
            return Err(Error::Protocol(format!("short read: {n} of {len} bytes")));
        }
        Ok(buf)
    }

    async fn wait_cts(&mut self, polls: u32, timing: &BusTiming) -> Result<u8> {
        for poll in 0..polls {
            let status = self.read(1, timing).await?[0];
            if status & STATUS_CTS != 0 {
                if status & STATUS_ERR != 0 {
                    return Err(Error::Protocol(format!(
                        "command rejected, status 0x{status:02X}"
                    )));
                }
                return Ok(status);
            }
            if poll + 1 < polls {
                tokio::time::sleep(timing.cts_interval).await;
            }
        }
        Err(Error::Timeout)
    }

    async fn transact(
        &mut self,
        cmd: &[u8],
        resp_len: usize,
        polls: u32,
        timing: &BusTiming,
    ) -> Result<Vec<u8>> {
        self.transport.send(cmd).await?;
        self.wait_cts(polls, timing).await?;
        if resp_len == 0 {
            return Ok(Vec::new());
        }
        self.read(resp_len, timing).await
    }

    /// One command with retry on transport failures. CTS timeouts and
    /// command errors are returned immediately.
    async fn command(
        &mut self,
        cmd: &[u8],
        resp_len: usize,
        polls: u32,
        timing: &BusTiming,
    ) -> Result<Vec<u8>> {
        let op = cmd.first().copied().unwrap_or_default();
        let mut attempt = 1;
        loop {
            match self.transact(cmd, resp_len, polls, timing).await {
                Ok(resp) => return Ok(resp),
                Err(e) if is_retryable(&e) && attempt < timing.attempts => {
                    tracing::warn!(
                        cmd = format_args!("0x{op:02X}"),
                        attempt,
                        attempts = timing.attempts,
                        error = %e,
                        "Bus write failed, retrying"
                    );
                    tokio::time::sleep(timing.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(cmd = format_args!("0x{op:02X}"), error = %e, "Command failed");
                    return Err(e);
                }
            }
        }
    }

    async fn write(&mut self, cmd: &[u8], timing: &BusTiming) -> Result<()> {
        self.command(cmd, 0, timing.cts_polls, timing).await?;
        Ok(())
    }

    async fn set_property(&mut self, prop: u16, value: u16, timing: &BusTiming) -> Result<()> {
        debug!(
            prop = format_args!("0x{prop:04X}"),
            value = format_args!("0x{value:04X}"),
            "SET_PROPERTY"
        );
        self.write(&commands::cmd_set_property(prop, value), timing)
            .await
    }

    fn clear_shadows(&mut self) {
        self.component = 0;
        self.acomp = 0;
        self.misc = 0;
    }
}

fn is_retryable(e: &Error) -> bool {
    matches!(e, Error::Transport(_) | Error::Io(_))
}

fn check_audio_processing(p: &AudioProcessing) -> Result<()> {
    let checks = [
        (
            (-40..=0).contains(&p.compressor_threshold),
            "compressor threshold",
        ),
        (p.compressor_attack <= 9, "compressor attack"),
        (p.compressor_release <= 5, "compressor release"),
        (p.compressor_gain <= 20, "compressor gain"),
        ((5..=2000).contains(&p.limiter_release), "limiter release"),
    ];
    for (ok, name) in checks {
        if !ok {
            return Err(Error::OutOfRange(format!("{name} outside chip range")));
        }
    }
    Ok(())
}

/// A connected SI4713 transmitter.
///
/// Constructed via [`Si4713Builder`](crate::builder::Si4713Builder). All
/// chip communication goes through the [`Transport`] provided at build
/// time.
pub struct Si4713 {
    bus: Mutex<Bus>,
    info: TransmitterInfo,
    timing: BusTiming,
    refclk_hz: u16,
}

impl Si4713 {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        bus_address: u8,
        refclk_hz: u16,
        timing: BusTiming,
    ) -> Self {
        Si4713 {
            bus: Mutex::new(Bus {
                transport,
                component: 0,
                acomp: 0,
                misc: 0,
            }),
            info: TransmitterInfo {
                model: "SI4713".into(),
                bus_address,
            },
            timing,
            refclk_hz,
        }
    }

    /// Update one packed property field through its shadow.
    async fn update_misc(&self, f: impl FnOnce(u16) -> u16) -> Result<()> {
        let mut bus = self.bus.lock().await;
        let misc = f(bus.misc);
        bus.set_property(props::TX_RDS_PS_MISC, misc, &self.timing)
            .await?;
        bus.misc = misc;
        Ok(())
    }

    async fn update_component(&self, f: impl FnOnce(u16) -> u16) -> Result<()> {
        let mut bus = self.bus.lock().await;
        let component = f(bus.component);
        bus.set_property(props::TX_COMPONENT_ENABLE, component, &self.timing)
            .await?;
        bus.component = component;
        Ok(())
    }
}

#[async_trait]
impl Transmitter for Si4713 {
    fn info(&self) -> &TransmitterInfo {
        &self.info
    }

    async fn init(&self) -> Result<()> {
        let t = &self.timing;
        let mut bus = self.bus.lock().await;
        bus.clear_shadows();

        bus.command(&commands::cmd_power_up(), 0, t.power_up_polls, t)
            .await?;
        bus.write(&commands::cmd_gpo_ctl(), t).await?;
        bus.set_property(props::REFCLK_FREQ, self.refclk_hz, t)
            .await?;
        bus.set_property(props::TX_ASQ_INTERRUPT_SELECT, props::ASQ_INTERRUPTS_ALL, t)
            .await?;
        bus.set_property(props::TX_RDS_PS_MESSAGE_COUNT, props::PS_MESSAGE_COUNT, t)
            .await?;
        bus.set_property(props::TX_RDS_PS_REPEAT_COUNT, props::PS_REPEAT_COUNT, t)
            .await?;

        tracing::info!(
            addr = format_args!("0x{:02X}", self.info.bus_address),
            refclk_hz = self.refclk_hz,
            "SI4713 powered up"
        );
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut bus = self.bus.lock().await;
        match bus.transport.reset().await {
            Ok(()) => tracing::info!("Hardware reset pulsed"),
            Err(Error::Unsupported(_)) => {
                debug!("No reset line, sending POWER_DOWN");
                bus.write(&commands::cmd_power_down(), &self.timing)
                    .await?;
            }
            Err(e) => return Err(e),
        }
        bus.clear_shadows();
        Ok(())
    }

    async fn tune(&self, frequency_khz: u32) -> Result<()> {
        limits::check_frequency(frequency_khz)?;
        let mut bus = self.bus.lock().await;
        bus.write(&commands::cmd_tune_freq(frequency_khz), &self.timing)
            .await?;
        debug!(frequency_khz, "Tuned");
        Ok(())
    }

    async fn set_output(&self, power: u8, antenna_cap: AntennaCap) -> Result<()> {
        if limits::check_power(power)? {
            tracing::warn!(power, "Output level above 115 dBµV advisory limit");
        }
        if let AntennaCap::Manual(step) = antenna_cap {
            limits::check_antenna_cap(step)?;
        }
        let mut bus = self.bus.lock().await;
        bus.write(
            &commands::cmd_tune_power(power, antenna_cap.wire_value()),
            &self.timing,
        )
        .await?;
        debug!(power, antenna_cap = ?antenna_cap, "Output set");
        Ok(())
    }

    async fn set_stereo(&self, on: bool) -> Result<()> {
        self.update_component(|c| props::with_stereo(c, on)).await
    }

    async fn set_pilot(&self, freq_hz: u16, deviation: u16) -> Result<()> {
        let mut bus = self.bus.lock().await;
        bus.set_property(props::TX_PILOT_FREQUENCY, freq_hz, &self.timing)
            .await?;
        bus.set_property(props::TX_PILOT_DEVIATION, deviation, &self.timing)
            .await
    }

    async fn set_audio(&self, deviation: u16, mute: bool, preemphasis: Preemphasis) -> Result<()> {
        if deviation > limits::AUDIO_DEVIATION_MAX {
            return Err(Error::OutOfRange(format!(
                "audio deviation {deviation} above {}",
                limits::AUDIO_DEVIATION_MAX
            )));
        }
        let mute_value = if mute { props::LINE_INPUT_MUTED } else { 0 };
        let t = &self.timing;
        let mut bus = self.bus.lock().await;
        bus.set_property(props::TX_AUDIO_DEVIATION, deviation, t)
            .await?;
        bus.set_property(props::TX_LINE_INPUT_MUTE, mute_value, t)
            .await?;
        bus.set_property(
            props::TX_PREEMPHASIS,
            props::preemphasis_value(preemphasis),
            t,
        )
        .await
    }

    async fn set_audio_processing(&self, p: &AudioProcessing) -> Result<()> {
        check_audio_processing(p)?;
        let t = &self.timing;
        let mut bus = self.bus.lock().await;
        let acomp = props::with_limiter(props::with_agc(bus.acomp, p.agc), p.limiter);
        bus.set_property(props::TX_ACOMP_ENABLE, acomp, t).await?;
        bus.acomp = acomp;
        bus.set_property(props::TX_ACOMP_THRESHOLD, p.compressor_threshold as u16, t)
            .await?;
        bus.set_property(props::TX_ACOMP_ATTACK_TIME, p.compressor_attack, t)
            .await?;
        bus.set_property(props::TX_ACOMP_RELEASE_TIME, p.compressor_release, t)
            .await?;
        bus.set_property(props::TX_ACOMP_GAIN, p.compressor_gain, t)
            .await?;
        bus.set_property(props::TX_LIMITER_RELEASE_TIME, p.limiter_release, t)
            .await
    }

    async fn rds_enable(&self, on: bool) -> Result<()> {
        self.update_component(|c| props::with_rds(c, on)).await
    }

    async fn rds_set_pi(&self, pi: u16) -> Result<()> {
        limits::check_pi(pi)?;
        let mut bus = self.bus.lock().await;
        bus.set_property(props::TX_RDS_PI, pi, &self.timing).await
    }

    async fn rds_set_pty(&self, pty: u8) -> Result<()> {
        limits::check_pty(pty)?;
        self.update_misc(|m| props::with_pty(m, pty)).await
    }

    async fn rds_set_tp(&self, on: bool) -> Result<()> {
        self.update_misc(|m| props::with_tp(m, on)).await
    }

    async fn rds_set_ta(&self, on: bool) -> Result<()> {
        self.update_misc(|m| props::with_ta(m, on)).await
    }

    async fn rds_set_ms(&self, music: bool) -> Result<()> {
        self.update_misc(|m| props::with_ms(m, music)).await
    }

    async fn rds_set_di(&self, di: DiFlags) -> Result<()> {
        self.update_misc(|m| props::with_di(m, di)).await
    }

    async fn rds_set_deviation(&self, deviation: u16) -> Result<()> {
        if deviation > limits::RDS_DEVIATION_MAX {
            return Err(Error::OutOfRange(format!(
                "RDS deviation {deviation} above {}",
                limits::RDS_DEVIATION_MAX
            )));
        }
        let mut bus = self.bus.lock().await;
        bus.set_property(props::TX_RDS_DEVIATION, deviation, &self.timing)
            .await
    }

    async fn rds_set_ps(&self, slot: u8, text: &str) -> Result<()> {
        limits::check_ps(slot, text)?;
        let mut bus = self.bus.lock().await;
        for cmd in commands::cmd_rds_ps_slot(slot, text) {
            bus.write(&cmd, &self.timing).await?;
        }
        debug!(slot, text, "PS loaded");
        Ok(())
    }

    async fn rds_set_rt(&self, text: &str, bank: RtBank, cr_terminate: bool) -> Result<()> {
        limits::check_rt(text)?;
        let payload = commands::rt_payload(text, cr_terminate);
        let mut bus = self.bus.lock().await;
        let tp = props::misc_tp(bus.misc);
        let pty = props::misc_pty(bus.misc);
        for cmd in commands::cmd_rt_segments(&payload, tp, pty, bank) {
            bus.write(&cmd, &self.timing).await?;
        }
        debug!(text, bank = %bank, "RadioText loaded");
        Ok(())
    }

    async fn read_status(&self) -> Result<TuneStatus> {
        let t = &self.timing;
        let mut bus = self.bus.lock().await;
        let resp = bus
            .command(
                &commands::cmd_tune_status(),
                commands::TUNE_STATUS_LEN,
                t.cts_polls,
                t,
            )
            .await?;
        commands::parse_tune_status(&resp)
    }

    async fn read_asq(&self) -> Result<AsqStatus> {
        let t = &self.timing;
        let mut bus = self.bus.lock().await;
        let resp = bus
            .command(
                &commands::cmd_asq_status(false),
                commands::ASQ_STATUS_LEN,
                t.cts_polls,
                t,
            )
            .await?;
        let asq = commands::parse_asq_status(&resp)?;
        if let Err(e) = bus.write(&commands::cmd_asq_status(true), t).await {
            tracing::warn!(error = %e, "ASQ interrupt clear failed");
        }
        Ok(asq)
    }

    async fn read_revision(&self) -> Result<Revision> {
        let t = &self.timing;
        let mut bus = self.bus.lock().await;
        let resp = bus
            .command(
                &commands::cmd_get_rev(),
                commands::REVISION_LEN,
                t.cts_polls,
                t,
            )
            .await?;
        commands::parse_revision(&resp)
    }

    async fn close(&self) -> Result<()> {
        let mut bus = self.bus.lock().await;
        bus.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Si4713Builder;
    use picast_test_harness::{MockTransport, SimulatedSi4713};

    fn make_tx(mock: MockTransport) -> Si4713 {
        Si4713Builder::new().build_uninitialized(Box::new(mock))
    }

    fn prop(p: u16, v: u16) -> Vec<u8> {
        commands::cmd_set_property(p, v)
    }

    /// Collects formatted log output for the current thread.
    #[derive(Clone, Default)]
    struct LogBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuf {
        fn warnings(&self) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .matches("advisory limit")
                .count()
        }
    }

    fn capture_warnings() -> (LogBuf, tracing::subscriber::DefaultGuard) {
        let logs = LogBuf::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    // -----------------------------------------------------------------
    // init / reset
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn init_powers_up_and_loads_baseline() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&[0x01, 0x12, 0x50]);
        mock.expect_ok(&[0x80, 0x0E]);
        mock.expect_ok(&prop(0x0201, 32_768));
        mock.expect_ok(&prop(0x2300, 0x0007));
        mock.expect_ok(&prop(0x2C05, 1));
        mock.expect_ok(&prop(0x2C04, 3));

        let tx = Si4713Builder::new()
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        assert_eq!(tx.info().model, "SI4713");
        assert_eq!(tx.info().bus_address, 0x63);
    }

    #[tokio::test]
    async fn reset_without_line_falls_back_to_power_down() {
        let mut mock = MockTransport::new().without_reset_line();
        mock.expect_ok(&[0x11]);
        let tx = make_tx(mock);
        tx.reset().await.unwrap();
    }

    // -----------------------------------------------------------------
    // RF
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn tune_sends_10khz_units() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&[0x30, 0x00, 0x26, 0x8E]);
        let tx = make_tx(mock);
        tx.tune(98_700).await.unwrap();
    }

    #[tokio::test]
    async fn tune_out_of_band_touches_nothing() {
        // An empty script fails any write.
        let tx = make_tx(MockTransport::new());
        assert!(matches!(tx.tune(75_990).await, Err(Error::OutOfRange(_))));
        assert!(matches!(tx.tune(108_010).await, Err(Error::OutOfRange(_))));
    }

    #[tokio::test]
    async fn tune_accepts_band_edges() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&[0x30, 0x00, 0x1D, 0xB0]);
        mock.expect_ok(&[0x30, 0x00, 0x2A, 0x30]);
        let tx = make_tx(mock);
        tx.tune(76_000).await.unwrap();
        tx.tune(108_000).await.unwrap();
    }

    #[tokio::test]
    async fn output_auto_cap_is_zero() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&[0x31, 0x00, 0x00, 115, 0]);
        mock.expect_ok(&[0x31, 0x00, 0x00, 118, 60]);
        let tx = make_tx(mock);
        tx.set_output(115, AntennaCap::Auto).await.unwrap();
        // Above the advisory limit: accepted with a warning.
        tx.set_output(118, AntennaCap::Manual(60)).await.unwrap();
    }

    #[tokio::test]
    async fn output_advisory_only_above_115() {
        let (logs, _guard) = capture_warnings();
        let mut mock = MockTransport::new();
        for power in 114..=120u8 {
            mock.expect_ok(&[0x31, 0x00, 0x00, power, 0]);
        }
        let tx = make_tx(mock);

        for power in 114..=115u8 {
            tx.set_output(power, AntennaCap::Auto).await.unwrap();
        }
        assert_eq!(logs.warnings(), 0);
        for (n, power) in (116..=120u8).enumerate() {
            tx.set_output(power, AntennaCap::Auto).await.unwrap();
            assert_eq!(logs.warnings(), n + 1, "no advisory at {power}");
        }
    }

    #[tokio::test]
    async fn output_above_max_rejected() {
        let tx = make_tx(MockTransport::new());
        assert!(matches!(
            tx.set_output(121, AntennaCap::Auto).await,
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            tx.set_output(100, AntennaCap::Manual(192)).await,
            Err(Error::OutOfRange(_))
        ));
    }

    // -----------------------------------------------------------------
    // Audio
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn audio_properties() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&prop(0x2101, 6825));
        mock.expect_ok(&prop(0x2105, 0));
        mock.expect_ok(&prop(0x2106, 0));
        mock.expect_ok(&prop(0x2107, 19_000));
        mock.expect_ok(&prop(0x2102, 675));
        let tx = make_tx(mock);
        tx.set_audio(6825, false, Preemphasis::Us75).await.unwrap();
        tx.set_pilot(19_000, 675).await.unwrap();
    }

    #[tokio::test]
    async fn audio_processing_registers() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&prop(0x2200, 0x0002));
        mock.expect_ok(&prop(0x2201, (-30i16) as u16));
        mock.expect_ok(&prop(0x2202, 0));
        mock.expect_ok(&prop(0x2203, 2));
        mock.expect_ok(&prop(0x2204, 15));
        mock.expect_ok(&prop(0x2205, 50));
        let tx = make_tx(mock);
        tx.set_audio_processing(&AudioProcessing::default())
            .await
            .unwrap();

        let bad = AudioProcessing {
            compressor_gain: 30,
            ..AudioProcessing::default()
        };
        assert!(matches!(
            tx.set_audio_processing(&bad).await,
            Err(Error::OutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn stereo_and_rds_share_component_register() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&prop(0x2100, 0x0003));
        mock.expect_ok(&prop(0x2100, 0x0007));
        mock.expect_ok(&prop(0x2100, 0x0004));
        let tx = make_tx(mock);
        tx.set_stereo(true).await.unwrap();
        tx.rds_enable(true).await.unwrap();
        tx.set_stereo(false).await.unwrap();
    }

    // -----------------------------------------------------------------
    // RDS
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn misc_flags_accumulate() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&prop(0x2C03, 10 << 5));
        mock.expect_ok(&prop(0x2C03, (10 << 5) | (1 << 10)));
        mock.expect_ok(&prop(0x2C03, (10 << 5) | (1 << 10) | (1 << 3)));
        mock.expect_ok(&prop(0x2C03, (10 << 5) | (1 << 10) | (1 << 3) | (1 << 15)));
        let tx = make_tx(mock);
        tx.rds_set_pty(10).await.unwrap();
        tx.rds_set_tp(true).await.unwrap();
        tx.rds_set_ms(true).await.unwrap();
        tx.rds_set_di(DiFlags::default()).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_rds_fields_rejected() {
        let tx = make_tx(MockTransport::new());
        assert!(matches!(tx.rds_set_pi(0).await, Err(Error::InvalidField(_))));
        assert!(matches!(tx.rds_set_pty(32).await, Err(Error::InvalidField(_))));
        assert!(matches!(
            tx.rds_set_ps(0, "TOO LONG!").await,
            Err(Error::InvalidField(_))
        ));
        assert!(matches!(
            tx.rds_set_ps(8, "SLOT").await,
            Err(Error::InvalidField(_))
        ));
        assert!(matches!(
            tx.rds_set_rt(&"x".repeat(33), RtBank::A, true).await,
            Err(Error::InvalidField(_))
        ));
        assert!(matches!(
            tx.rds_set_deviation(751).await,
            Err(Error::OutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn ps_writes_two_halves() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&[0x36, 0, b'P', b'I', b'C', b'A']);
        mock.expect_ok(&[0x36, 1, b'S', b'T', b' ', b' ']);
        let tx = make_tx(mock);
        tx.rds_set_ps(0, "PICAST").await.unwrap();
    }

    #[tokio::test]
    async fn rt_carries_pty_tp_and_bank() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&prop(0x2C03, 1 << 10));
        mock.expect_ok(&prop(0x2C03, (1 << 10) | (5 << 5)));
        let payload = commands::rt_payload("News at ten", true);
        for cmd in commands::cmd_rt_segments(&payload, true, 5, RtBank::B) {
            mock.expect_ok(&cmd);
        }
        let tx = make_tx(mock);
        tx.rds_set_tp(true).await.unwrap();
        tx.rds_set_pty(5).await.unwrap();
        tx.rds_set_rt("News at ten", RtBank::B, true).await.unwrap();
    }

    // -----------------------------------------------------------------
    // Status reads
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn read_status_parses_response() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x33, 0x00], &[0x80, 0x00, 0x26, 0x8E, 0x00, 115, 42, 0x00]);
        let tx = make_tx(mock);
        let st = tx.read_status().await.unwrap();
        assert_eq!(st.frequency_khz, 98_700);
        assert_eq!(st.power, 115);
        assert_eq!(st.antenna_cap, 42);
        assert!(st.is_transmitting());
    }

    #[tokio::test]
    async fn read_asq_then_clears() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x34, 0x00], &[0x80, 0x04, 0x00, 0x00, 0xFE]);
        mock.expect_ok(&[0x34, 0x01]);
        let tx = make_tx(mock);
        let asq = tx.read_asq().await.unwrap();
        assert!(asq.overmodulated);
        assert_eq!(asq.input_level_dbfs, -2);
    }

    #[tokio::test]
    async fn read_revision() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x10], &[0x80, 13, b'3', b'0', 0, 0, b'3', b'0', b'A']);
        let tx = make_tx(mock);
        let rev = tx.read_revision().await.unwrap();
        assert_eq!(rev.part_number, 13);
        assert_eq!(rev.chip_revision, 'A');
    }

    #[tokio::test]
    async fn command_error_bit_is_protocol_error() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x30, 0x00, 0x26, 0x8E], &[0xC0]);
        let tx = make_tx(mock);
        assert!(matches!(tx.tune(98_700).await, Err(Error::Protocol(_))));
    }

    // -----------------------------------------------------------------
    // Bus robustness (simulated chip)
    // -----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn nacked_writes_are_retried() {
        let sim = SimulatedSi4713::new();
        let handle = sim.handle();
        let tx = Si4713Builder::new()
            .build_with_transport(Box::new(sim))
            .await
            .unwrap();

        handle.fail_next_sends(2);
        tx.tune(101_100).await.unwrap();
        assert_eq!(handle.frequency_khz(), 101_100);

        handle.fail_next_sends(3);
        let err = tx.tune(99_000).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(handle.frequency_khz(), 101_100);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_cts_times_out() {
        let sim = SimulatedSi4713::new();
        let handle = sim.handle();
        let tx = Si4713Builder::new()
            .build_with_transport(Box::new(sim))
            .await
            .unwrap();

        handle.set_cts_stuck(true);
        assert!(matches!(tx.read_status().await, Err(Error::Timeout)));
        handle.set_cts_stuck(false);
        tx.read_status().await.unwrap();
    }

    #[tokio::test]
    async fn full_bring_up_on_simulated_chip() {
        let sim = SimulatedSi4713::new();
        let handle = sim.handle();
        let tx = Si4713Builder::new()
            .build_with_transport(Box::new(sim))
            .await
            .unwrap();

        tx.tune(98_700).await.unwrap();
        tx.set_output(115, AntennaCap::Auto).await.unwrap();
        tx.rds_set_pi(0xC201).await.unwrap();
        tx.rds_set_ps(0, "PICAST").await.unwrap();
        tx.rds_set_rt("Hello world", RtBank::A, true).await.unwrap();

        assert_eq!(handle.property(0x2C01), Some(0xC201));
        assert_eq!(handle.ps_slot(0), "PICAST  ");
        assert_eq!(handle.rt_text(), "Hello world");
        let st = tx.read_status().await.unwrap();
        assert_eq!(st.frequency_khz, 98_700);
        assert_eq!(st.antenna_cap, 42);

        tx.reset().await.unwrap();
        assert!(!handle.is_powered());
        assert!(matches!(tx.read_status().await, Err(Error::Protocol(_))));

        tx.init().await.unwrap();
        assert_eq!(handle.power_up_count(), 2);
    }
}
