use super::*;
use crate::config::to_db;
use crate::device::DeviceInfo;
use crate::mapping::Bus;
use crate::metering::AudioLevels;

const FRAME_SAMPLES: usize = 960; // 20 ms at 48 kHz
const FRAME_LENGTH: i64 = TIMEBASE / 50;

fn s16_stereo() -> AudioFormat {
    AudioFormat::new(16, 2).unwrap()
}

fn encode_s16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| ((s * 32768.0) as i16).to_le_bytes())
        .collect()
}

/// Small deterministic PRNG for test signals
struct XorShift(u64);

impl XorShift {
    fn next_uniform(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0
    }
}

#[derive(Default)]
struct CapturingSink {
    levels: Mutex<Vec<AudioLevels>>,
}

impl OutputSink for CapturingSink {
    fn emit_level(&self, levels: &AudioLevels) {
        self.levels.lock().push(levels.clone());
    }
}

fn two_bus_mapping() -> InputMapping {
    InputMapping::new(vec![
        Bus::new("Camera", DeviceSpec::capture_card(0), 0, 1),
        Bus::new("Music", DeviceSpec::audio_input(0), 0, 1),
    ])
}

#[test]
fn test_identical_channel_sets_do_not_reset() {
    let mixer = AudioMixer::new(MixerConfig::default());
    mixer.set_input_mapping(two_bus_mapping()).unwrap();

    let data = encode_s16(&[0.1; FRAME_SAMPLES * 2]);
    assert!(mixer.add_audio(DeviceSpec::capture_card(0), &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH));
    assert!(mixer.add_audio(DeviceSpec::audio_input(0), &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH));

    // Renamed and reordered, same channels per device
    mixer
        .set_input_mapping(InputMapping::new(vec![
            Bus::new("Playback", DeviceSpec::audio_input(0), 1, 0),
            Bus::new("Cam 1", DeviceSpec::capture_card(0), 1, 0),
        ]))
        .unwrap();
    assert_eq!(mixer.device_local_pts(DeviceSpec::capture_card(0)), Some(FRAME_LENGTH));
    assert_eq!(mixer.device_local_pts(DeviceSpec::audio_input(0)), Some(FRAME_LENGTH));
    assert_eq!(mixer.buffered_input_frames(DeviceSpec::capture_card(0)), Some(FRAME_SAMPLES));

    // Card 0 gains a channel: only card 0 resets
    mixer
        .set_input_mapping(InputMapping::new(vec![
            Bus::new("Playback", DeviceSpec::audio_input(0), 1, 0),
            Bus::new("Cam 1", DeviceSpec::capture_card(0), 1, 0),
            Bus::new("Lav", DeviceSpec::capture_card(0), 2, 2),
        ]))
        .unwrap();
    assert_eq!(mixer.device_local_pts(DeviceSpec::capture_card(0)), Some(0));
    assert_eq!(mixer.buffered_input_frames(DeviceSpec::capture_card(0)), Some(0));
    assert_eq!(mixer.device_local_pts(DeviceSpec::audio_input(0)), Some(FRAME_LENGTH));
}

#[test]
fn test_unused_unregistered_devices_are_dropped() {
    let mixer = AudioMixer::new(MixerConfig::default());
    mixer.set_input_mapping(two_bus_mapping()).unwrap();
    mixer
        .set_input_mapping(InputMapping::new(vec![Bus::new("Camera", DeviceSpec::capture_card(0), 0, 1)]))
        .unwrap();
    assert_eq!(mixer.device_local_pts(DeviceSpec::audio_input(0)), None);

    // Registered devices are held even when unused
    mixer.register_device(
        DeviceSpec::audio_input(3),
        DeviceInfo {
            display_name: "USB interface".to_string(),
            num_channels: 4,
            sample_rate: 44100,
            available: true,
        },
    );
    mixer.set_input_mapping(InputMapping::default()).unwrap();
    assert_eq!(mixer.device_local_pts(DeviceSpec::audio_input(3)), Some(0));
    assert_eq!(mixer.buffered_input_frames(DeviceSpec::audio_input(3)), None);
}

#[test]
fn test_mapping_validated_against_registered_width() {
    let mixer = AudioMixer::new(MixerConfig::default());
    mixer.register_device(
        DeviceSpec::capture_card(1),
        DeviceInfo {
            display_name: "Card 1".to_string(),
            num_channels: 2,
            sample_rate: 48000,
            available: true,
        },
    );
    let err = mixer
        .set_input_mapping(InputMapping::new(vec![Bus::new("Cam", DeviceSpec::capture_card(1), 0, 2)]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::ChannelOutOfRange { channel: 2, available: 2, .. }));
    assert_eq!(mixer.input_mapping(), InputMapping::default());
}

#[test]
fn test_add_silence_advances_clock_per_frame() {
    let mixer = AudioMixer::new(MixerConfig::default());
    mixer.set_input_mapping(two_bus_mapping()).unwrap();
    let card = DeviceSpec::capture_card(0);

    assert!(mixer.add_silence(card, FRAME_SAMPLES, 3, FRAME_LENGTH));
    assert_eq!(mixer.device_local_pts(card), Some(3 * FRAME_LENGTH));
    assert_eq!(mixer.buffered_input_frames(card), Some(3 * FRAME_SAMPLES));
}

#[test]
fn test_short_chunk_dropped_but_clock_advances() {
    let mixer = AudioMixer::new(MixerConfig::default());
    mixer.set_input_mapping(two_bus_mapping()).unwrap();
    let card = DeviceSpec::capture_card(0);

    let data = encode_s16(&[0.1; 100]);
    assert!(mixer.add_audio(card, &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH));
    assert_eq!(mixer.device_local_pts(card), Some(FRAME_LENGTH));
    assert_eq!(mixer.buffered_input_frames(card), Some(0));
}

#[test]
fn test_audio_for_unknown_device_is_accepted_and_ignored() {
    let mixer = AudioMixer::new(MixerConfig::default());
    let data = encode_s16(&[0.1; FRAME_SAMPLES * 2]);
    assert!(mixer.add_audio(DeviceSpec::capture_card(7), &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH));
    assert_eq!(mixer.device_local_pts(DeviceSpec::capture_card(7)), None);
}

#[test]
fn test_unsilencing_resets_resampler() {
    let mixer = AudioMixer::new(MixerConfig::default());
    mixer.set_input_mapping(two_bus_mapping()).unwrap();
    let card = DeviceSpec::capture_card(0);

    assert!(mixer.add_silence(card, FRAME_SAMPLES, 2, FRAME_LENGTH));
    assert!(mixer.silence_device(card, true));
    assert_eq!(mixer.device_silenced(card), Some(true));
    assert_eq!(mixer.device_local_pts(card), Some(2 * FRAME_LENGTH));

    assert!(mixer.silence_device(card, false));
    assert_eq!(mixer.device_silenced(card), Some(false));
    assert_eq!(mixer.device_local_pts(card), Some(0));
}

#[test]
fn test_unavailable_device_reads_as_silence() {
    let config = MixerConfig {
        resampler_target_delay_seconds: 0.01,
        ..MixerConfig::default()
    };
    let mixer = AudioMixer::new(config);
    let card = DeviceSpec::capture_card(0);
    mixer.register_device(
        card,
        DeviceInfo {
            display_name: "Card 0".to_string(),
            num_channels: 2,
            sample_rate: 48000,
            available: false,
        },
    );
    mixer.set_input_mapping(two_bus_mapping()).unwrap();
    assert_eq!(mixer.device_silenced(card), Some(true));

    let data = encode_s16(&[0.5; FRAME_SAMPLES * 2]);
    for i in 0..5 {
        mixer.add_audio(card, &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH);
        let out = mixer.get_output(i * FRAME_LENGTH, FRAME_SAMPLES, RateAdjustmentPolicy::AdjustRate);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    mixer.set_device_available(card, true);
    assert_eq!(mixer.device_silenced(card), Some(false));
}

#[test]
fn test_bus_settings_round_trip() {
    let mixer = AudioMixer::new(MixerConfig::default());
    mixer.set_input_mapping(two_bus_mapping()).unwrap();

    mixer.set_fader_volume_db(1, -6.5);
    mixer.set_eq(1, EqBand::Treble, 3.0);
    mixer.set_compressor_threshold_dbfs(1, -30.0);
    mixer.set_compressor_enabled(1, false);
    mixer.set_locut_enabled(1, false);
    mixer.set_level_compressor_enabled(1, false);
    mixer.set_gain_staging_db(1, 4.0);

    assert_eq!(mixer.fader_volume_db(1), Some(-6.5));
    assert_eq!(mixer.eq(1, EqBand::Treble), Some(3.0));
    assert_eq!(mixer.eq(1, EqBand::Bass), Some(0.0));
    assert_eq!(mixer.compressor_threshold_dbfs(1), Some(-30.0));
    assert_eq!(mixer.compressor_enabled(1), Some(false));
    assert_eq!(mixer.locut_enabled(1), Some(false));
    assert_eq!(mixer.level_compressor_enabled(1), Some(false));
    assert_eq!(mixer.gain_staging_db(1), Some(4.0));

    // Bus 0 untouched, bus 2 does not exist
    assert_eq!(mixer.fader_volume_db(0), Some(0.0));
    assert_eq!(mixer.compressor_threshold_dbfs(0), Some(-26.0));
    assert_eq!(mixer.fader_volume_db(2), None);

    // Settings survive a mapping change by bus index
    mixer.set_input_mapping(two_bus_mapping()).unwrap();
    assert_eq!(mixer.fader_volume_db(1), Some(-6.5));
}

#[test]
fn test_global_settings_round_trip() {
    let mixer = AudioMixer::new(MixerConfig::default());
    assert_eq!(mixer.limiter_threshold_dbfs(), -10.0);
    assert!(mixer.limiter_enabled());
    assert!(mixer.final_makeup_gain_auto());
    assert_eq!(mixer.locut_cutoff_hz(), 120.0);

    mixer.set_limiter_threshold_dbfs(-6.0);
    mixer.set_limiter_enabled(false);
    mixer.set_final_makeup_gain_auto(false);
    mixer.set_final_makeup_gain_db(-3.0);
    mixer.set_locut_cutoff_hz(80.0);

    assert_eq!(mixer.limiter_threshold_dbfs(), -6.0);
    assert!(!mixer.limiter_enabled());
    assert!(!mixer.final_makeup_gain_auto());
    assert!((mixer.final_makeup_gain_db() - (-3.0)).abs() < 1e-4);
    assert_eq!(mixer.locut_cutoff_hz(), 80.0);
}

#[test]
fn test_empty_mapping_outputs_silence_and_levels() {
    let mixer = AudioMixer::new(MixerConfig::default());
    let sink = Arc::new(CapturingSink::default());
    mixer.set_output_sink(sink.clone());

    let out = mixer.get_output(0, FRAME_SAMPLES, RateAdjustmentPolicy::AdjustRate);
    assert_eq!(out.len(), FRAME_SAMPLES * 2);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(sink.levels.lock().len(), 1);
    assert!(sink.levels.lock()[0].buses.is_empty());
}

#[test]
fn test_noise_end_to_end() {
    // -48 dBFS RMS white noise through one bus with +20 dB manual gain staging
    let config = MixerConfig {
        resampler_target_delay_seconds: 0.02,
        makeup_gain_half_life_seconds: 1.0,
        ..MixerConfig::default()
    };
    let mixer = AudioMixer::new(config);
    let card = DeviceSpec::capture_card(0);
    mixer
        .set_input_mapping(InputMapping::new(vec![Bus::new("Noise", card, 0, 1)]))
        .unwrap();
    mixer.set_locut_enabled(0, false);
    mixer.set_level_compressor_enabled(0, false);
    mixer.set_compressor_enabled(0, false);
    mixer.set_gain_staging_db(0, 20.0);
    mixer.set_limiter_enabled(false);

    let sink = Arc::new(CapturingSink::default());
    mixer.set_output_sink(sink.clone());

    let amplitude = 10f32.powf(-48.0 / 20.0) * 3f32.sqrt();
    let mut rng = XorShift(0x2545_f491_4f6c_dd1d);
    let mut frame = vec![0.0f32; FRAME_SAMPLES * 2];

    for i in 0..1000 {
        for s in frame.iter_mut() {
            *s = rng.next_uniform() * amplitude;
        }
        let data = encode_s16(&frame);
        assert!(mixer.add_audio(card, &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH));

        let out = mixer.get_output(i * FRAME_LENGTH, FRAME_SAMPLES, RateAdjustmentPolicy::AdjustRate);
        assert_eq!(out.len(), FRAME_SAMPLES * 2);
        assert!(out.iter().all(|s| s.is_finite()), "non-finite output in frame {}", i);
    }

    let levels = sink.levels.lock();
    assert_eq!(levels.len(), 1000);
    let last = levels.last().unwrap();

    // Bus peak: input peak plus the gain chain; band-limited resampling may overshoot
    let expected_peak_db = to_db(amplitude) + 20.0;
    for channel in 0..2 {
        let peak = last.buses[0].current_level_dbfs[channel];
        assert!(
            peak > expected_peak_db - 3.0 && peak < expected_peak_db + 6.5,
            "bus peak {} dBFS, expected about {} dBFS",
            peak,
            expected_peak_db
        );
    }

    // Auto makeup gain pulled the mix onto the reference loudness
    assert!(
        (last.momentary_lufs - (-23.0)).abs() < 1.0,
        "momentary {} LUFS",
        last.momentary_lufs
    );
    assert!(last.final_makeup_gain_db.abs() < 5.0);
    assert!(last.integrated_lufs > -26.0 && last.integrated_lufs < -20.0);
    assert!(last.correlation.abs() < 0.5, "uncorrelated noise, got {}", last.correlation);
}

#[test]
fn test_silenced_device_does_not_queue_silence() {
    let mixer = AudioMixer::new(MixerConfig::default());
    mixer.set_input_mapping(two_bus_mapping()).unwrap();
    let card = DeviceSpec::capture_card(0);

    assert!(mixer.silence_device(card, true));
    for i in 0..500 {
        assert!(mixer.add_silence(card, FRAME_SAMPLES, 1, FRAME_LENGTH));
        mixer.get_output(i * FRAME_LENGTH, FRAME_SAMPLES, RateAdjustmentPolicy::AdjustRate);
    }
    assert_eq!(mixer.buffered_input_frames(card), Some(0));
    assert_eq!(mixer.device_local_pts(card), Some(500 * FRAME_LENGTH));
}

#[test]
fn test_busy_ingest_lock_times_out() {
    let mixer = AudioMixer::new(MixerConfig::default());
    mixer.set_input_mapping(two_bus_mapping()).unwrap();
    let card = DeviceSpec::capture_card(0);
    let data = encode_s16(&[0.1; FRAME_SAMPLES * 2]);
    let timeout = mixer.config().ingest_lock_timeout;

    {
        let _held = mixer.state.lock();

        let start = std::time::Instant::now();
        assert!(!mixer.add_audio(card, &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH));
        let waited = start.elapsed();
        assert!(waited >= timeout, "gave up after {:?}", waited);
        assert!(waited < timeout + std::time::Duration::from_secs(1), "blocked for {:?}", waited);

        assert!(!mixer.add_silence(card, FRAME_SAMPLES, 1, FRAME_LENGTH));
        assert!(!mixer.silence_device(card, true));
    }

    // Nothing was applied while the lock was busy
    assert_eq!(mixer.device_local_pts(card), Some(0));
    assert_eq!(mixer.buffered_input_frames(card), Some(0));
    assert_eq!(mixer.device_silenced(card), Some(false));
    assert!(mixer.add_audio(card, &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH));
}

#[test]
fn test_remapped_bus_meters_start_fresh() {
    let config = MixerConfig {
        resampler_target_delay_seconds: 0.01,
        ..MixerConfig::default()
    };
    let mixer = AudioMixer::new(config);
    mixer.set_input_mapping(two_bus_mapping()).unwrap();
    // Bare strip: bus peaks are the input peaks
    mixer.set_locut_enabled(0, false);
    mixer.set_level_compressor_enabled(0, false);
    mixer.set_compressor_enabled(0, false);
    let sink = Arc::new(CapturingSink::default());
    mixer.set_output_sink(sink.clone());

    let card = DeviceSpec::capture_card(0);
    let data = encode_s16(&[0.5; FRAME_SAMPLES * 2]);
    // Long enough for the locut fade-out to finish
    for i in 0..30 {
        mixer.add_audio(card, &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH);
        mixer.get_output(i * FRAME_LENGTH, FRAME_SAMPLES, RateAdjustmentPolicy::AdjustRate);
    }
    let loud_peak = sink.levels.lock().last().unwrap().buses[0].historic_peak_dbfs;
    assert!(loud_peak > -20.0, "camera bus peak {}", loud_peak);

    // Bus 0 now listens to the silent input
    mixer
        .set_input_mapping(InputMapping::new(vec![Bus::new("Music", DeviceSpec::audio_input(0), 0, 1)]))
        .unwrap();
    mixer.get_output(30 * FRAME_LENGTH, FRAME_SAMPLES, RateAdjustmentPolicy::AdjustRate);

    let levels = sink.levels.lock();
    let last = levels.last().unwrap();
    assert_eq!(last.buses.len(), 1);
    assert!(last.buses[0].historic_peak_dbfs < -60.0, "inherited {}", last.buses[0].historic_peak_dbfs);
    assert!(last.buses[0].peak_level_dbfs[0] < -60.0);
}

#[test]
fn test_device_registry_lists_mapped_and_registered() {
    let mixer = AudioMixer::new(MixerConfig::default());
    let info = DeviceInfo {
        display_name: "USB interface".to_string(),
        num_channels: 4,
        sample_rate: 44100,
        available: true,
    };
    mixer.register_device(DeviceSpec::audio_input(3), info.clone());
    mixer.set_input_mapping(two_bus_mapping()).unwrap();

    let devices = mixer.devices();
    assert_eq!(devices.len(), 3);
    assert!(devices.contains(&(DeviceSpec::capture_card(0), None)));
    assert!(devices.contains(&(DeviceSpec::audio_input(0), None)));
    assert!(devices.contains(&(DeviceSpec::audio_input(3), Some(info))));
}

#[test]
fn test_noise_through_default_chain() {
    // -48 dBFS RMS white noise through an untouched bus and master
    let mixer = AudioMixer::new(MixerConfig::default());
    let card = DeviceSpec::capture_card(0);
    mixer
        .set_input_mapping(InputMapping::new(vec![Bus::new("Noise", card, 0, 1)]))
        .unwrap();
    let sink = Arc::new(CapturingSink::default());
    mixer.set_output_sink(sink.clone());

    let amplitude = 10f32.powf(-48.0 / 20.0) * 3f32.sqrt();
    let mut rng = XorShift(0x2545_f491_4f6c_dd1d);
    let mut frame = vec![0.0f32; FRAME_SAMPLES * 2];

    for i in 0..1000 {
        for s in frame.iter_mut() {
            *s = rng.next_uniform() * amplitude;
        }
        let data = encode_s16(&frame);
        assert!(mixer.add_audio(card, &data, FRAME_SAMPLES, s16_stereo(), FRAME_LENGTH));

        let out = mixer.get_output(i * FRAME_LENGTH, FRAME_SAMPLES, RateAdjustmentPolicy::AdjustRate);
        assert!(out.iter().all(|s| s.is_finite()), "non-finite output in frame {}", i);
    }

    let levels = sink.levels.lock();
    let last = levels.last().unwrap();
    let bus = &last.buses[0];

    // Noise peaks sit below the level compressor threshold: full 26 dB lift
    assert!(
        (bus.gain_staging_db - 26.0).abs() < 0.5,
        "implied gain staging {} dB",
        bus.gain_staging_db
    );

    // Input peak, level compressor lift, then the bus compressor and its makeup
    let expected_peak_db = to_db(amplitude) + bus.gain_staging_db + bus.compressor_attenuation_db + 6.0;
    for channel in 0..2 {
        let peak = bus.current_level_dbfs[channel];
        assert!(
            peak > expected_peak_db - 3.0 && peak < expected_peak_db + 5.0,
            "bus peak {} dBFS, expected about {} dBFS",
            peak,
            expected_peak_db
        );
    }
    assert!(bus.compressor_attenuation_db < -3.0);
    assert!(last.limiter_attenuation_db > -0.01, "limiter engaged: {}", last.limiter_attenuation_db);

    // The lifted and compressed mix lands more than 5 LU above -23 LUFS, so
    // the makeup gain stays frozen instead of converging
    assert!(last.momentary_lufs > -18.0, "momentary {} LUFS", last.momentary_lufs);
    assert!(last.momentary_lufs < -12.0, "momentary {} LUFS", last.momentary_lufs);
    assert!(last.final_makeup_gain_db.abs() < 0.1);
    assert_eq!(levels[500].final_makeup_gain_db, last.final_makeup_gain_db);
}
