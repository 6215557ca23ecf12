use relipak::{AnyPacket, FragmentationOptions, UdpMarshal};
use relipak::packet::NetworkIdentifier;

fn main() -> std::io::Result<()> {
    env_logger::init();

    let marshal = UdpMarshal::connect("91.121.135.70:61244", FragmentationOptions::default())
        .expect("failed to create client");

    let payload: String = (0..4000).map(|v| char::from((b'a' + (v % 26) as u8))).collect();
    let announce = AnyPacket::NetworkIdentifier(NetworkIdentifier::new(payload));
    marshal.send(announce.encode_frame().expect("failed to encode announce")).expect("failed to submit announce");

    for frame in 0.. {
        for packet in marshal.tick()? {
            println!("Client: incoming {:?} at frame {:?}", packet, frame);
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    Ok(())
}
