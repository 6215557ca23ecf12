use relipak::{AnyPacket, FragmentationOptions, UdpMarshal};
use relipak::packet::NetworkIdentifier;

fn main() -> std::io::Result<()> {
    env_logger::init();

    let really_big_message: String = (0..65536).map(|v| char::from(b'a' + (v % 26) as u8)).collect();

    let server = UdpMarshal::bind("0.0.0.0:50000", "127.0.0.1:50001", FragmentationOptions::default())
        .expect("failed to create server");
    let client = UdpMarshal::bind("127.0.0.1:50001", "127.0.0.1:50000", FragmentationOptions::default())
        .expect("failed to create client");

    let mut sent_message = false;

    println!("Created server & client. Starting main loop");
    for _frame in 0..300 {
        for packet in client.tick()? {
            println!("Client: incoming {:?}", packet);
        }
        for packet in server.tick()? {
            println!("Server: incoming {:?}", packet);
        }

        if !sent_message {
            let packet = AnyPacket::NetworkIdentifier(NetworkIdentifier::new(really_big_message.clone()));
            client.send(packet.encode_frame().expect("failed to encode")).expect("failed to submit");
            sent_message = true;
        }

        std::thread::sleep(std::time::Duration::from_micros(16666));
    }

    {
        // drop the server
        let _s = server;
    }

    for _frame in 0..10 {
        for packet in client.tick()? {
            println!("Client: incoming {:?}", packet);
        }
        std::thread::sleep(std::time::Duration::from_micros(16666));
    }

    println!("Done.");
    Ok(())
}
