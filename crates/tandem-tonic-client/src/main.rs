//! Command-line client for the calculator, greet and blog services.
//!
//! One sub-command per operation. Responses are printed to stdout as they
//! arrive; failures exit non-zero with the call's status.
//!
//! ```bash
//! tandem-tonic-client sum 10 25
//! tandem-tonic-client --timeout-ms 1000 greet-with-deadline Ada Lovelace
//! tandem-tonic-client --compression gzip maximum 3 7 2 15
//! tandem-tonic-client blog create --author-id ada --title "Notes"
//! ```

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{BlogCommand, BlogFields, CliArgs, Command};
use futures::stream;
use std::path::Path;
use tandem::{CallError, CallOptions, Client, multiplex};
use tandem_tonic_core::{
    TonicTransport,
    proto::{blog::*, calculator::*, greet::*},
};
use tokio::io::AsyncWriteExt;
use tonic::transport::Endpoint;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let client = Client::new(connect(&args).await?);
    let opts = args.call_options();
    run(&client, args.command, opts).await
}

async fn connect(args: &CliArgs) -> anyhow::Result<TonicTransport> {
    #[allow(unused_mut)]
    let mut endpoint = Endpoint::from_shared(args.addr.clone())
        .with_context(|| format!("invalid server address {:?}", args.addr))?;

    #[cfg(feature = "tls")]
    if let Some(ca_cert) = &args.ca_cert {
        use tonic::transport::{Certificate, ClientTlsConfig};
        let pem = tokio::fs::read(ca_cert)
            .await
            .with_context(|| format!("failed to read CA_CERT {}", ca_cert.display()))?;
        endpoint = endpoint.tls_config(
            ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(pem))
                .domain_name(args.domain.clone()),
        )?;
    }

    let transport = TonicTransport::connect(endpoint)
        .await
        .with_context(|| format!("could not connect to {}", args.addr))?;
    Ok(match args.compression.encoding() {
        Some(encoding) => transport.with_compression(encoding),
        None => transport,
    })
}

async fn run(
    client: &Client<TonicTransport>,
    command: Command,
    opts: CallOptions,
) -> anyhow::Result<()> {
    match command {
        Command::Sum { first, second } => {
            let resp: SumResponse = client
                .unary(
                    SUM,
                    SumRequest {
                        first_number: first,
                        second_number: second,
                    },
                    opts,
                )
                .await?;
            println!("{}", resp.sum_result);
        }
        Command::Primes { number } => {
            let mut factors = client
                .server_streaming::<_, PrimeNumberDecompositionResponse>(
                    PRIME_NUMBER_DECOMPOSITION,
                    PrimeNumberDecompositionRequest { number },
                    opts,
                )
                .await?;
            while let Some(resp) = factors.message().await? {
                println!("{}", resp.prime_factor);
            }
        }
        Command::Average { numbers } => {
            let mut call = client
                .client_streaming::<ComputeAverageRequest, ComputeAverageResponse>(
                    COMPUTE_AVERAGE,
                    opts,
                );
            for number in numbers {
                call.send(ComputeAverageRequest { number }).await?;
            }
            println!("{}", call.close_and_recv().await?.average);
        }
        Command::Maximum { numbers } => {
            let call = client.bidi_streaming::<FindMaximumRequest, FindMaximumResponse>(
                FIND_MAXIMUM,
                opts,
            );
            let requests = numbers
                .into_iter()
                .map(|number| FindMaximumRequest { number });
            let result = multiplex(call, stream::iter(requests), |resp: &FindMaximumResponse| {
                println!("{}", resp.maximum);
            })
            .await?;
            warn_unsent(result.sent, result.send_error);
        }
        Command::Sqrt { number } => {
            let resp: SquareRootResponse = client
                .unary(SQUARE_ROOT, SquareRootRequest { number }, opts)
                .await?;
            println!("{}", resp.number_root);
        }
        Command::Greet(person) => {
            let resp: GreetResponse = client
                .unary(GREET, GreetRequest::from(Greeting::from(person)), opts)
                .await?;
            println!("{}", resp.result);
        }
        Command::GreetManyTimes(person) => {
            let mut greetings = client
                .server_streaming::<_, GreetManyTimesResponse>(
                    GREET_MANY_TIMES,
                    GreetManyTimesRequest::from(Greeting::from(person)),
                    opts,
                )
                .await?;
            while let Some(resp) = greetings.message().await? {
                println!("{}", resp.result);
            }
        }
        Command::LongGreet(people) => {
            let mut call =
                client.client_streaming::<LongGreetRequest, LongGreetResponse>(LONG_GREET, opts);
            for greeting in people.greetings()? {
                call.send(greeting.into()).await?;
            }
            print!("{}", call.close_and_recv().await?.result);
        }
        Command::GreetEveryone(people) => {
            let call = client.bidi_streaming::<GreetEveryoneRequest, GreetEveryoneResponse>(
                GREET_EVERYONE,
                opts,
            );
            let requests = people
                .greetings()?
                .into_iter()
                .map(GreetEveryoneRequest::from);
            let result = multiplex(call, stream::iter(requests), |resp: &GreetEveryoneResponse| {
                println!("{}", resp.result);
            })
            .await?;
            warn_unsent(result.sent, result.send_error);
        }
        Command::GreetWithDeadline(person) => {
            let resp: GreetWithDeadlineResponse = client
                .unary(
                    GREET_WITH_DEADLINE,
                    GreetWithDeadlineRequest::from(Greeting::from(person)),
                    opts,
                )
                .await
                .inspect_err(|e| {
                    if e.code() == tonic::Code::DeadlineExceeded {
                        tracing::warn!("Timeout was hit! Deadline was exceeded");
                    }
                })?;
            println!("{}", resp.result);
        }
        Command::Blog(command) => run_blog(client, command, opts).await?,
    }
    Ok(())
}

fn warn_unsent(sent: usize, send_error: Option<CallError>) {
    if let Some(err) = send_error {
        tracing::warn!("Server finished after {} requests: {}", sent, err);
    }
}

fn blog(id: String, fields: BlogFields) -> Blog {
    Blog {
        id,
        author_id: fields.author_id,
        title: fields.title,
        content: fields.content,
    }
}

fn print_blog(blog: Option<Blog>) {
    if let Some(b) = blog {
        println!("{}\t{}\t{}\t{}", b.id, b.author_id, b.title, b.content);
    }
}

async fn run_blog(
    client: &Client<TonicTransport>,
    command: BlogCommand,
    opts: CallOptions,
) -> anyhow::Result<()> {
    match command {
        BlogCommand::Create(fields) => {
            let resp: CreateBlogResponse = client
                .unary(
                    CREATE_BLOG,
                    CreateBlogRequest {
                        blog: Some(blog(String::new(), fields)),
                    },
                    opts,
                )
                .await?;
            print_blog(resp.blog);
        }
        BlogCommand::Read { id } => {
            let resp: ReadBlogResponse = client
                .unary(READ_BLOG, ReadBlogRequest { blog_id: id }, opts)
                .await?;
            print_blog(resp.blog);
        }
        BlogCommand::Update { id, fields } => {
            let resp: UpdateBlogResponse = client
                .unary(
                    UPDATE_BLOG,
                    UpdateBlogRequest {
                        blog: Some(blog(id, fields)),
                    },
                    opts,
                )
                .await?;
            print_blog(resp.blog);
        }
        BlogCommand::Delete { id } => {
            let resp: DeleteBlogResponse = client
                .unary(DELETE_BLOG, DeleteBlogRequest { blog_id: id }, opts)
                .await?;
            println!("{}", resp.blog_id);
        }
        BlogCommand::List => {
            let mut blogs = client
                .server_streaming::<_, ListBlogResponse>(LIST_BLOG, ListBlogRequest {}, opts)
                .await?;
            while let Some(resp) = blogs.message().await? {
                print_blog(resp.blog);
            }
        }
        BlogCommand::Download { file_name, out } => {
            let out = match out {
                Some(out) => out,
                None => Path::new(&file_name)
                    .file_name()
                    .map(Into::into)
                    .with_context(|| format!("no file name in {file_name:?}"))?,
            };
            let mut chunks = client
                .server_streaming::<_, DownloadImageResponse>(
                    DOWNLOAD_IMAGE,
                    DownloadImageRequest { file_name },
                    opts,
                )
                .await?;

            // Renamed to `out` once the stream ends with an ok status.
            let partial = out.with_extension("part");
            let mut file = tokio::fs::File::create(&partial)
                .await
                .with_context(|| format!("failed to create {}", partial.display()))?;
            let mut written = 0usize;
            let received = async {
                while let Some(resp) = chunks.message().await? {
                    file.write_all(&resp.file_chunk).await?;
                    written += resp.file_chunk.len();
                }
                file.flush().await?;
                anyhow::Ok(())
            }
            .await;
            if let Err(err) = received {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(err);
            }
            tokio::fs::rename(&partial, &out).await?;
            println!("{} ({written} bytes)", out.display());
        }
    }
    Ok(())
}
