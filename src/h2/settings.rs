//! HTTP/2 SETTINGS negotiation (RFC 7540 §6.5.2), grounded on the
//! donor's default parameter table and valid-range checks.

use crate::h2::frame::{ErrorCode, SettingsId, SettingsParameter};

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;
pub const DEFAULT_ENABLE_PUSH: bool = true;
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 8_192;

const MAX_FRAME_SIZE_FLOOR: u32 = 16_384;
const MAX_FRAME_SIZE_CEILING: u32 = 16_777_215;
const MAX_WINDOW_SIZE: u32 = 2_147_483_647;

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: DEFAULT_ENABLE_PUSH,
            max_concurrent_streams: Some(DEFAULT_MAX_CONCURRENT_STREAMS),
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: Some(DEFAULT_MAX_HEADER_LIST_SIZE),
        }
    }
}

impl Settings {
    /// Applies a SETTINGS frame's parameters in order, validating each
    /// value against its RFC-mandated range. The first invalid value
    /// aborts and reports which error code the connection must GOAWAY
    /// with.
    pub fn apply(&mut self, params: &[SettingsParameter]) -> Result<(), ErrorCode> {
        for p in params {
            let Some(id) = SettingsId::from_u16(p.id) else {
                continue;
            };
            match id {
                SettingsId::HeaderTableSize => self.header_table_size = p.value,
                SettingsId::EnablePush => {
                    if p.value > 1 {
                        return Err(ErrorCode::ProtocolError);
                    }
                    self.enable_push = p.value == 1;
                }
                SettingsId::MaxConcurrentStreams => self.max_concurrent_streams = Some(p.value),
                SettingsId::InitialWindowSize => {
                    if p.value > MAX_WINDOW_SIZE {
                        return Err(ErrorCode::FlowControlError);
                    }
                    self.initial_window_size = p.value;
                }
                SettingsId::MaxFrameSize => {
                    if !(MAX_FRAME_SIZE_FLOOR..=MAX_FRAME_SIZE_CEILING).contains(&p.value) {
                        return Err(ErrorCode::ProtocolError);
                    }
                    self.max_frame_size = p.value;
                }
                SettingsId::MaxHeaderListSize => self.max_header_list_size = Some(p.value),
            }
        }
        Ok(())
    }

    pub fn to_params(self) -> Vec<SettingsParameter> {
        let mut out = vec![
            SettingsParameter { id: SettingsId::HeaderTableSize as u16, value: self.header_table_size },
            SettingsParameter { id: SettingsId::EnablePush as u16, value: self.enable_push as u32 },
            SettingsParameter { id: SettingsId::InitialWindowSize as u16, value: self.initial_window_size },
            SettingsParameter { id: SettingsId::MaxFrameSize as u16, value: self.max_frame_size },
        ];
        if let Some(v) = self.max_concurrent_streams {
            out.push(SettingsParameter { id: SettingsId::MaxConcurrentStreams as u16, value: v });
        }
        if let Some(v) = self.max_header_list_size {
            out.push(SettingsParameter { id: SettingsId::MaxHeaderListSize as u16, value: v });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc() {
        let s = Settings::default();
        assert_eq!(s.initial_window_size, 65_535);
        assert_eq!(s.max_frame_size, 16_384);
    }

    #[test]
    fn rejects_max_frame_size_below_floor() {
        let mut s = Settings::default();
        let params = [SettingsParameter { id: SettingsId::MaxFrameSize as u16, value: 100 }];
        assert_eq!(s.apply(&params), Err(ErrorCode::ProtocolError));
    }

    #[test]
    fn rejects_window_size_over_max() {
        let mut s = Settings::default();
        let params = [SettingsParameter { id: SettingsId::InitialWindowSize as u16, value: MAX_WINDOW_SIZE + 1 }];
        assert_eq!(s.apply(&params), Err(ErrorCode::FlowControlError));
    }

    #[test]
    fn unknown_setting_id_is_ignored() {
        let mut s = Settings::default();
        let params = [SettingsParameter { id: 0xff, value: 1 }];
        assert!(s.apply(&params).is_ok());
    }
}
