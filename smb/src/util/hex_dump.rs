use smb_core::logging::trace;

/// Formats `buffer` sixteen bytes per line: offset, hex column, then the
/// printable characters with `_` standing in for everything else.
pub fn hex_dump_lines(buffer: &[u8]) -> Vec<String> {
    buffer.chunks(16).enumerate().map(|(line, chunk)| {
        let hex: String = chunk.iter().map(|byte| format!("{:02x} ", byte)).collect();
        let ascii: String = chunk.iter().map(|byte| {
            let c = *byte as char;
            if c.is_ascii_graphic() || c == ' ' { c } else { '_' }
        }).flat_map(|c| [' ', c]).collect();
        format!("{:04x} | {:<48} | {}", line * 16, hex, ascii)
    }).collect()
}

/// Dumps a raw PDU at trace level.
pub fn dump_smb_message(buffer: &[u8]) {
    for line in hex_dump_lines(buffer) {
        trace!("{}", line);
    }
}
