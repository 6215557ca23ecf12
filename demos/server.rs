use relipak::{AnyPacket, FragmentationOptions, UdpMarshal};
use relipak::packet::NetworkIdentifier;

fn generate_really_big_message(i: u8) -> String {
    (0..6000).map(|_| char::from(b'0' + (i % 10))).collect()
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let marshal = UdpMarshal::bind("0.0.0.0:61244", "91.121.135.71:61244", FragmentationOptions::default())
        .expect("failed to create server");

    let mut n: u8 = 0;
    for i in 0u64.. {
        for packet in marshal.tick()? {
            println!("Server: incoming {:?}", packet);
        }

        if i % 300 == 0 {
            let big_message = generate_really_big_message(n);
            println!("Sending (n={:?}) {:?} bytes", n, big_message.len());
            let packet = AnyPacket::NetworkIdentifier(NetworkIdentifier::new(big_message));
            marshal.send(packet.encode_frame().expect("failed to encode")).expect("failed to submit");
            n = n.wrapping_add(1);
        }

        std::thread::sleep(std::time::Duration::from_micros(16666));
    }
    Ok(())
}
