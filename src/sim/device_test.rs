// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the block-device simulator.

#[cfg(test)]
mod tests {
    use crate::error::KvsError;
    use crate::sim::{SimDevice, PAGE_COUNT, WORDS_PER_PAGE, WORD_SIZE};
    use tempfile::TempDir;

    fn fresh_device() -> (TempDir, SimDevice) {
        let temp_dir = TempDir::new().unwrap();
        let mut dev = SimDevice::create(temp_dir.path()).unwrap();
        dev.format().unwrap();
        (temp_dir, dev)
    }

    #[test]
    fn test_format_fills_with_ff() {
        let (_tmp, mut dev) = fresh_device();

        let mut word = [0u8; WORD_SIZE as usize];
        dev.read_word(0, 0, &mut word).unwrap();
        assert_eq!(word, [0xFF; 4]);
        dev.read_word(PAGE_COUNT - 1, WORDS_PER_PAGE - 1, &mut word)
            .unwrap();
        assert_eq!(word, [0xFF; 4]);
    }

    #[test]
    fn test_write_then_read_word() {
        let (_tmp, mut dev) = fresh_device();

        dev.write_word(3, 17, &[1, 2, 3, 4]).unwrap();

        let mut word = [0u8; 4];
        dev.read_word(3, 17, &mut word).unwrap();
        assert_eq!(word, [1, 2, 3, 4]);

        // Neighbouring word untouched
        dev.read_word(3, 18, &mut word).unwrap();
        assert_eq!(word, [0xFF; 4]);
    }

    #[test]
    fn test_erase_page_restores_ff() {
        let (_tmp, mut dev) = fresh_device();

        dev.write_word(5, 0, &[0xAA; 4]).unwrap();
        dev.write_word(5, 255, &[0xBB; 4]).unwrap();
        dev.erase_page(5).unwrap();

        let mut word = [0u8; 4];
        dev.read_word(5, 0, &mut word).unwrap();
        assert_eq!(word, [0xFF; 4]);
        dev.read_word(5, 255, &mut word).unwrap();
        assert_eq!(word, [0xFF; 4]);
    }

    #[test]
    fn test_bounds_checks() {
        let (_tmp, mut dev) = fresh_device();
        let mut word = [0u8; 4];

        assert!(matches!(
            dev.read_word(PAGE_COUNT, 0, &mut word),
            Err(KvsError::InvalidPage { .. })
        ));
        assert!(matches!(
            dev.read_word(0, WORDS_PER_PAGE, &mut word),
            Err(KvsError::InvalidWordOffset { .. })
        ));
        assert!(matches!(
            dev.erase_page(PAGE_COUNT),
            Err(KvsError::InvalidPage { .. })
        ));
    }

    #[test]
    fn test_wrong_word_buffer_size() {
        let (_tmp, mut dev) = fresh_device();
        let mut small = [0u8; 3];

        assert!(matches!(
            dev.read_word(0, 0, &mut small),
            Err(KvsError::InvalidParam { .. })
        ));
        assert!(matches!(
            dev.write_word(0, 0, &small),
            Err(KvsError::InvalidParam { .. })
        ));
    }

    #[test]
    fn test_write_failure_countdown() {
        let (_tmp, mut dev) = fresh_device();

        dev.set_write_failure_countdown(2);
        dev.write_word(0, 0, &[1, 1, 1, 1]).unwrap();
        dev.write_word(0, 1, &[2, 2, 2, 2]).unwrap();

        // Third write fails before touching the file, and so does every
        // write after it.
        assert_eq!(dev.write_word(0, 2, &[3, 3, 3, 3]), Err(KvsError::PowerLoss));
        assert_eq!(dev.write_word(0, 3, &[4, 4, 4, 4]), Err(KvsError::PowerLoss));

        let mut word = [0u8; 4];
        dev.read_word(0, 2, &mut word).unwrap();
        assert_eq!(word, [0xFF; 4]);

        // Disarming restores normal writes.
        dev.set_write_failure_countdown(-1);
        dev.write_word(0, 2, &[3, 3, 3, 3]).unwrap();
    }

    #[test]
    fn test_dead_device_refuses_every_mutation() {
        let (_tmp, mut dev) = fresh_device();
        dev.write_word(1, 0, &[9; 4]).unwrap();

        dev.set_write_failure_countdown(0);
        assert_eq!(dev.write_word(0, 0, &[1; 4]), Err(KvsError::PowerLoss));
        assert_eq!(dev.erase_page(1), Err(KvsError::PowerLoss));
        assert_eq!(dev.format(), Err(KvsError::PowerLoss));

        // Reads still work, and the earlier write is untouched.
        let mut word = [0u8; 4];
        dev.read_word(1, 0, &mut word).unwrap();
        assert_eq!(word, [9; 4]);
    }

    #[test]
    fn test_open_existing_sees_previous_writes() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut dev = SimDevice::create(temp_dir.path()).unwrap();
            dev.format().unwrap();
            dev.write_word(7, 7, &[7; 4]).unwrap();
        }

        let mut dev = SimDevice::open_existing(temp_dir.path()).unwrap();
        let mut word = [0u8; 4];
        dev.read_word(7, 7, &mut word).unwrap();
        assert_eq!(word, [7; 4]);
    }

    #[test]
    fn test_open_existing_requires_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            SimDevice::open_existing(temp_dir.path()),
            Err(KvsError::Io { .. })
        ));
    }
}
