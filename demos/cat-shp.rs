use std::env;
use std::io;
use std::io::Write;
use std::process;
use shapecodec::shapefile;

fn main() {
    let mut args = env::args();

    if args.len() != 2 {
        writeln!(&mut io::stderr(), "Usage: {} <SHP_PATH_WITHOUT_EXTENSION>", args.next().unwrap()).unwrap();
        process::exit(1);
    }

    args.next();
    let path = args.next().unwrap();

    let mut reader = match shapefile::open_read_windows1252(&path) {
        Err(err) => {
            writeln!(&mut io::stderr(), "{}", err).unwrap();
            process::exit(1);
        }
        Ok(reader) => reader,
    };

    if let Err(err) = reader.analyze() {
        writeln!(&mut io::stderr(), "Error during analyze: {}", err).unwrap();
        process::exit(1);
    }
    println!("{:?} as {:?} {:?}, bbox {:?}", reader.shape_type(), reader.effective_type(), reader.dims(), reader.bbox());

    let mut n_records: usize = 0;
    loop {
        match reader.read_entity(n_records) {
            Err(err) => {
                writeln!(&mut io::stderr(), "Error during read: {}", err).unwrap();
                process::exit(1);
            }
            Ok(false) => break,
            Ok(true) => {
                let entity = reader.entity().unwrap();
                let values: Vec<String> = entity.fields.iter()
                    .map(|f| format!("{}={}", f.name, f.value))
                    .collect();
                println!("{}: {}; {:?}", n_records, values.join(", "), entity.geometry);
                n_records += 1;
            }
        }
    }

    println!("Read {} records", n_records);
}
