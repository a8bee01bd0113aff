//! Integration test: a `.smx`-shaped recipe document drives a DCD write,
//! an IMX image write and a jump against a mocked HID transport.

use imxboot::sdp::device_table::HidProfile;
use imxboot::sdp::transport::MockTransport;
use imxboot::sdp::SdpClient;
use imxboot::smartboot::{run_recipe, RecipeFile};

fn profile() -> HidProfile {
    HidProfile {
        report1_size: 1025,
        report2_size: 1025,
        report3_size: 5,
        report4_size: 65,
        status_big_endian: true,
    }
}

fn success_reports(n: usize) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    for _ in 0..n {
        out.push((3u8, vec![0, 0, 0, 0]));
        out.push((4u8, vec![0x12, 0x8a, 0x8a, 0x12]));
    }
    out
}

#[test]
fn recipe_builds_an_image_writes_it_and_jumps() {
    // Build the DCD bytes from the text program via the DCD engine's own
    // binary encoder, so the recipe's DATA segment is grounded in real
    // encoder output rather than a hand-rolled hex literal.
    let dcd_text = "WriteValue 4 0x30340004 0x4F400005\n";
    let dcd = imxboot::dcd::text::parse(dcd_text).expect("dcd text parses");
    let dcd_bin = imxboot::dcd::binary::export(&dcd).expect("dcd exports");
    let dcd_hex: String = dcd_bin.iter().map(|b| format!("{b:02X}")).collect();

    let yaml = format!(
        r#"
HEAD:
  NAME: demo
  CHIP: mx7
VARS:
  OCRAM: "0x00910000"
DATA:
  dcd:
    TYPE: DCD
    DATA: "{dcd_hex}"
  img:
    TYPE: IMX
    ADDR: "0x877FF000"
    DATA:
      STADDR: "0x877FF000"
      DCDSEG: dcd
BODY:
  - NAME: boot
    CMDS: |
      WDCD dcd {{{{ OCRAM }}}}
      WIMG img
      JRUN img
"#
    );

    let mut file = RecipeFile::parse(&yaml).expect("recipe parses");
    file.substitute().expect("substitution resolves");
    assert_eq!(file.head.chip, "mx7");

    let mut mock = MockTransport::new();
    // WDCD and WIMG each consume an interim + final report; JRUN only
    // requires the interim status, since the device may jump away before
    // sending a final report.
    for (id, data) in success_reports(2) {
        mock.push_response(id, data);
    }
    mock.push_response(3, vec![0, 0, 0, 0]);

    let mut client = SdpClient::open(mock, profile());
    run_recipe(&file, "boot", &mut client).expect("recipe runs to completion");

    let written = &client.transport().written;
    assert!(written.iter().any(|(id, _)| *id == 1));
    let commands: Vec<u16> = written
        .iter()
        .filter(|(id, _)| *id == 1)
        .map(|(_, buf)| u16::from_be_bytes([buf[0], buf[1]]))
        .collect();
    assert_eq!(commands.len(), 3);
}

#[test]
fn unresolved_head_chip_variable_is_left_untouched() {
    let yaml = r#"
HEAD:
  NAME: demo
  CHIP: "{{ chip }}"
DATA: {}
BODY: []
"#;
    let file = RecipeFile::parse(yaml).expect("recipe parses");
    // HEAD is not a substitution target; only DATA/BODY are.
    assert_eq!(file.head.chip, "{{ chip }}");
}
